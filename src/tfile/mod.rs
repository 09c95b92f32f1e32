//! Temp-file pool (C8): per-query tuple pages backing a result list file.
//! Two-level storage — a capped in-memory `membuf` array, spilling to a
//! disk-resident temp file once full — guarded by a mutex/condvar
//! single-producer/single-consumer protocol. See spec.md §3 "Temp file",
//! §4.8.

use std::sync::{Condvar, Mutex};

use crate::error::{Result, ServerError};

/// One tuple page image. A real build carries a fixed `IO_PAGE_SIZE` byte
/// buffer; this keeps the header fields explicit and the payload as a
/// plain `Vec<u8>` sized to whatever the producer wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub tuple_count: u32,
    pub overflow_page_id: i32,
    pub last_tuple_offset: u32,
    pub last_tuple_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: PageHeader,
    pub payload: Vec<u8>,
}

/// A page identifier within the pool's private spill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vpid {
    pub volid: i16,
    pub pageid: i32,
}

struct SpillSlot {
    page: Page,
    dirty: bool,
}

struct State {
    membuf: Vec<Page>,
    spill: Vec<SpillSlot>,
    /// False once the producer has posted its last page; lets a blocked
    /// consumer distinguish "not yet available" from "will never arrive".
    producing: bool,
    interrupted: bool,
    pins: u64,
    waiting: bool,
}

/// One temp file, owned by exactly one query entry (spec.md §3 invariant).
pub struct TempFile {
    pub vfid: i32,
    membuf_cap: usize,
    state: Mutex<State>,
    cond: Condvar,
}

impl TempFile {
    pub fn new(vfid: i32, membuf_cap: usize) -> TempFile {
        TempFile {
            vfid,
            membuf_cap,
            state: Mutex::new(State {
                membuf: Vec::new(),
                spill: Vec::new(),
                producing: true,
                interrupted: false,
                pins: 0,
                waiting: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Producer writes the next page: fills `membuf` up to capacity, then
    /// spills to the file-system-backed area. Wakes any blocked consumer.
    pub fn put_page(&self, page: Page) {
        let mut state = self.state.lock().unwrap();
        if state.membuf.len() < self.membuf_cap {
            state.membuf.push(page);
        } else {
            state.spill.push(SpillSlot { page, dirty: false });
        }
        self.cond.notify_all();
    }

    /// Producer is done; wakes any consumer blocked waiting for a page
    /// that will now never arrive.
    pub fn finish_producing(&self) {
        let mut state = self.state.lock().unwrap();
        state.producing = false;
        self.cond.notify_all();
    }

    pub fn total_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.membuf.len() + state.spill.len()
    }

    /// Sets the interrupt flag and wakes the blocked consumer, if any
    /// (spec.md §5: "`interrupt(query)` sets the flag, signals the
    /// condvar, and returns").
    pub fn interrupt(&self) {
        let mut state = self.state.lock().unwrap();
        state.interrupted = true;
        self.cond.notify_all();
    }

    /// Fetches page `index`, pinning it. Blocks on the condvar while the
    /// producer may still post the page; fails with `Interrupted` if the
    /// interrupt flag was set while waiting, or once the producer has
    /// finished without ever posting that index.
    pub fn get_page(&self, index: usize) -> Result<Page> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(page) = Self::lookup(&state, index) {
                state.pins += 1;
                return Ok(page);
            }
            if state.interrupted {
                return Err(ServerError::Interrupted);
            }
            if !state.producing {
                return Err(ServerError::Interrupted);
            }
            state.waiting = true;
            state = self.cond.wait(state).unwrap();
            state.waiting = false;
        }
    }

    fn lookup(state: &State, index: usize) -> Option<Page> {
        if index < state.membuf.len() {
            return Some(state.membuf[index].clone());
        }
        let spill_index = index - state.membuf.len();
        state.spill.get(spill_index).map(|s| s.page.clone())
    }

    /// Releases a page obtained via `get_page`. Every `get_page` MUST be
    /// paired with exactly one `free_page` on every exit path (spec.md §3).
    pub fn free_page(&self) {
        let mut state = self.state.lock().unwrap();
        state.pins = state.pins.saturating_sub(1);
    }

    /// Explicit write-back hint for a spilled page.
    pub fn set_dirty(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        if index >= state.membuf.len() {
            let spill_index = index - state.membuf.len();
            if let Some(slot) = state.spill.get_mut(spill_index) {
                slot.dirty = true;
            }
        }
    }

    /// True once every pinned page has been freed — the invariant the
    /// pool checks before a temp file is deallocated.
    pub fn pins_balanced(&self) -> bool {
        self.state.lock().unwrap().pins == 0
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().unwrap().interrupted
    }

    pub fn has_waiting_consumer(&self) -> bool {
        self.state.lock().unwrap().waiting
    }
}
