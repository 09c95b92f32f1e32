//! Query manager (C7): per-transaction query registry, synchronous and
//! asynchronous execution, interrupt/cancel, and streaming of a query's
//! result list file back to the consumer one page at a time. See
//! spec.md §4.7 and §5.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::plan::{Plan, PlanExecutor, Row};
use crate::tfile::{Page, PageHeader, TempFile};
use crate::typecheck::Literal;
use crate::wire::value::Value as WireValue;
use crate::xasl::PlanId;

pub type QueryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFlags {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    Running,
    Completed,
}

struct EntryState {
    mode: QueryMode,
    interrupted: bool,
    error: Option<ServerError>,
    error_acked: bool,
}

/// A single query's registry entry: its result list file plus the state
/// the producer and consumer sides exchange under `state`'s mutex.
pub struct QueryEntry {
    pub query_id: QueryId,
    pub plan_id: PlanId,
    pub list_file: Arc<TempFile>,
    state: Mutex<EntryState>,
    completion: Condvar,
}

impl QueryEntry {
    fn mark_completed(&self, error: Option<ServerError>) {
        let mut state = self.state.lock().unwrap();
        state.mode = QueryMode::Completed;
        state.error = error;
        self.completion.notify_all();
    }

    fn wait_for_completion(&self) {
        let mut state = self.state.lock().unwrap();
        while state.mode != QueryMode::Completed {
            state = self.completion.wait(state).unwrap();
        }
    }

    fn is_interrupted(&self) -> bool {
        self.state.lock().unwrap().interrupted
    }
}

/// What `execute_query` hands back to the dispatcher.
pub struct ExecuteOutcome {
    pub query_id: QueryId,
    pub list_id: i32,
    pub server_cache_time: u64,
    /// `None` when the client's cache time already matched (empty
    /// carrier) or the result set has zero rows.
    pub first_page: Option<Row>,
}

/// Per-transaction query registry plus the plans installed for it to run
/// (a real build fetches the XASL stream from `xasl::PlanCache` instead;
/// this crate keeps the structured `Plan` `execute_query` actually runs
/// in its own map — see DESIGN.md).
pub struct QueryManager {
    executor: Arc<dyn PlanExecutor>,
    membuf_cap: usize,
    next_query_id: AtomicU64,
    cache_time: AtomicU64,
    plans: Mutex<HashMap<PlanId, Plan>>,
    entries: Mutex<HashMap<QueryId, Arc<QueryEntry>>>,
}

impl QueryManager {
    pub fn new(executor: Arc<dyn PlanExecutor>, membuf_cap: usize) -> QueryManager {
        QueryManager {
            executor,
            membuf_cap,
            next_query_id: AtomicU64::new(1),
            cache_time: AtomicU64::new(0),
            plans: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the structured plan a prior `xasl::PlanCache::prepare`
    /// call installed, so `execute_query` can find it by id.
    pub fn install_plan(&self, id: PlanId, plan: Plan) {
        self.plans.lock().unwrap().insert(id, plan);
    }

    /// `execute_query(plan_id, host_vars, flags, client_cache_time)`
    /// (spec.md §4.7). A cache-time match returns the empty carrier
    /// without touching the plan or spawning a producer.
    pub fn execute_query(
        &self,
        plan_id: PlanId,
        host_vars: Vec<Literal>,
        flags: ExecFlags,
        client_cache_time: Option<u64>,
    ) -> Result<ExecuteOutcome> {
        let current_time = self.cache_time.load(Ordering::SeqCst);
        if client_cache_time == Some(current_time) {
            return Ok(ExecuteOutcome {
                query_id: 0,
                list_id: 0,
                server_cache_time: current_time,
                first_page: None,
            });
        }
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get(&plan_id)
            .cloned()
            .ok_or(ServerError::InvalidXaslNode)?;
        self.run(plan_id, plan, host_vars, flags)
    }

    /// `prepare_and_execute(xasl_stream, host_vars, flags)`: one-shot path
    /// that bypasses the plan cache entirely — the caller already has the
    /// structured plan in hand (no compile step between this call and
    /// the executor, matching spec.md §4.7's "unified path").
    pub fn prepare_and_execute(
        &self,
        plan: Plan,
        host_vars: Vec<Literal>,
        flags: ExecFlags,
    ) -> Result<ExecuteOutcome> {
        let plan_id = PlanId([0u8; 32]);
        self.run(plan_id, plan, host_vars, flags)
    }

    fn run(
        &self,
        plan_id: PlanId,
        plan: Plan,
        host_vars: Vec<Literal>,
        flags: ExecFlags,
    ) -> Result<ExecuteOutcome> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::SeqCst);
        let list_file = Arc::new(TempFile::new(query_id as i32, self.membuf_cap));
        let entry = Arc::new(QueryEntry {
            query_id,
            plan_id,
            list_file: list_file.clone(),
            state: Mutex::new(EntryState {
                mode: QueryMode::Running,
                interrupted: false,
                error: None,
                error_acked: false,
            }),
            completion: Condvar::new(),
        });
        self.entries.lock().unwrap().insert(query_id, entry.clone());

        let executor = self.executor.clone();
        let producer_entry = entry.clone();
        let handle = thread::spawn(move || produce(producer_entry, executor, plan, host_vars));

        if flags == ExecFlags::Sync {
            handle.join().expect("producer thread panicked");
        }

        let first_page = peek_first_page(&list_file);
        let server_cache_time = self.cache_time.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(ExecuteOutcome {
            query_id,
            list_id: list_file.vfid,
            server_cache_time,
            first_page,
        })
    }

    /// `get_list_file_page(query_id, volid, pageid)`. `volid` is echoed
    /// back unused (this crate's temp-file pool is single-volume);
    /// `pageid` addresses a page by its position in the result set.
    pub fn get_list_file_page(&self, query_id: QueryId, _volid: i16, pageid: i32) -> Result<Row> {
        let entry = self.lookup(query_id)?;
        match entry.list_file.get_page(pageid as usize) {
            Ok(page) => {
                entry.list_file.free_page();
                page_to_row(&page)
            }
            Err(ServerError::Interrupted) => {
                entry.list_file.free_page();
                Err(ServerError::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// `end_query(query_id)`: releases the result list file and the
    /// query entry. Idempotent.
    pub fn end_query(&self, query_id: QueryId) {
        self.entries.lock().unwrap().remove(&query_id);
    }

    /// `sync_query(query_id, wait_flag)`: forces completion, returning
    /// the final list id. With `wait_flag` unset, returns whatever list
    /// id the entry already has without blocking on completion.
    pub fn sync_query(&self, query_id: QueryId, wait_flag: bool) -> Result<i32> {
        let entry = self.lookup(query_id)?;
        if wait_flag {
            entry.wait_for_completion();
        }
        Ok(entry.list_file.vfid)
    }

    /// `interrupt(query_id)`: sets the flag and wakes any waiter.
    pub fn interrupt(&self, query_id: QueryId) -> Result<()> {
        let entry = self.lookup(query_id)?;
        entry.state.lock().unwrap().interrupted = true;
        entry.list_file.interrupt();
        Ok(())
    }

    /// `get_query_info`: the packed error area for an async query whose
    /// producer aborted. Does not clear the error — see `ack_query_error`.
    pub fn query_error(&self, query_id: QueryId) -> Result<Option<ServerError>> {
        let entry = self.lookup(query_id)?;
        Ok(entry.state.lock().unwrap().error.clone())
    }

    /// Clears a producer error once the consumer has acknowledged it
    /// (spec.md §4.7: "clearing the producer error is deferred until the
    /// consumer acknowledges completion").
    pub fn ack_query_error(&self, query_id: QueryId) -> Result<()> {
        let entry = self.lookup(query_id)?;
        let mut state = entry.state.lock().unwrap();
        state.error = None;
        state.error_acked = true;
        Ok(())
    }

    fn lookup(&self, query_id: QueryId) -> Result<Arc<QueryEntry>> {
        self.entries
            .lock()
            .unwrap()
            .get(&query_id)
            .cloned()
            .ok_or(ServerError::InvalidSession)
    }
}

/// Runs the executor to completion and posts every row as its own page.
/// Polls the interrupt flag between rows (spec.md §5: "producers are
/// required to poll the flag at page boundaries"). A deadlock abort
/// freezes the entry's error and wakes every waiter immediately (spec.md
/// §4.7).
fn produce(entry: Arc<QueryEntry>, executor: Arc<dyn PlanExecutor>, plan: Plan, host_vars: Vec<Literal>) {
    let rows = match executor.execute(&plan, &host_vars) {
        Ok(rows) => rows,
        Err(e) => {
            if e.triggers_unilateral_abort() {
                warn!(query_id = entry.query_id, error = %e, "producer unilaterally aborted");
            }
            entry.list_file.finish_producing();
            entry.mark_completed(Some(e));
            return;
        }
    };

    for row in rows {
        if entry.is_interrupted() {
            debug!(query_id = entry.query_id, "producer observed interrupt, stopping");
            break;
        }
        entry.list_file.put_page(row_to_page(&row));
    }
    entry.list_file.finish_producing();
    entry.mark_completed(None);
}

fn peek_first_page(list_file: &TempFile) -> Option<Row> {
    match list_file.get_page(0) {
        Ok(page) => {
            list_file.free_page();
            page_to_row(&page).ok()
        }
        Err(_) => None,
    }
}

pub(crate) fn literal_to_wire(v: &Literal) -> WireValue {
    match v {
        Literal::Null => WireValue::Null,
        Literal::Logical(Some(true)) => WireValue::Integer(1),
        Literal::Logical(Some(false)) => WireValue::Integer(0),
        Literal::Logical(None) => WireValue::Null,
        Literal::Integer(n) => WireValue::Integer(*n),
        Literal::Bigint(n) => WireValue::Bigint(*n),
        Literal::Smallint(n) => WireValue::Smallint(*n),
        Literal::Float(n) => WireValue::Float(*n),
        Literal::Double(n) => WireValue::Double(*n),
        Literal::Numeric { unscaled, precision, scale } => {
            WireValue::Numeric { unscaled: *unscaled, precision: *precision, scale: *scale }
        }
        Literal::Monetary(n) => WireValue::Monetary(*n),
        Literal::Date(n) => WireValue::Date(*n),
        Literal::Time(n) => WireValue::Time(*n),
        Literal::Timestamp(n) => WireValue::Timestamp(*n),
        Literal::Datetime(n) => WireValue::Datetime(*n),
        Literal::Char(s) => WireValue::Char(s.clone()),
        Literal::Varchar(s) => WireValue::Varchar(s.clone()),
        Literal::Bit(b) => WireValue::Bit(b.clone()),
        Literal::Varbit(b) => WireValue::Varbit(b.clone()),
    }
}

pub(crate) fn wire_to_literal(v: WireValue) -> Literal {
    match v {
        WireValue::Null => Literal::Null,
        WireValue::Integer(n) => Literal::Integer(n),
        WireValue::Bigint(n) => Literal::Bigint(n),
        WireValue::Smallint(n) => Literal::Smallint(n),
        WireValue::Float(n) => Literal::Float(n),
        WireValue::Double(n) => Literal::Double(n),
        WireValue::Numeric { unscaled, precision, scale } => Literal::Numeric { unscaled, precision, scale },
        WireValue::Monetary(n) => Literal::Monetary(n),
        WireValue::Date(n) => Literal::Date(n),
        WireValue::Time(n) => Literal::Time(n),
        WireValue::Timestamp(n) => Literal::Timestamp(n),
        WireValue::Datetime(n) => Literal::Datetime(n),
        WireValue::Char(s) => Literal::Char(s),
        WireValue::Varchar(s) => Literal::Varchar(s),
        WireValue::Bit(b) => Literal::Bit(b),
        WireValue::Varbit(b) => Literal::Varbit(b),
        WireValue::Oid { .. } => Literal::Null,
    }
}

/// Encodes one result row as a tuple page using the wire codec's
/// self-describing value encoding (field count, then each value tagged).
fn row_to_page(row: &Row) -> Page {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&(row.len() as u32).to_be_bytes());
    for field in row {
        literal_to_wire(field).pack(&mut buf);
    }
    Page {
        header: PageHeader { tuple_count: 1, overflow_page_id: -1, last_tuple_offset: 0, last_tuple_length: buf.len() as u32 },
        payload: buf.to_vec(),
    }
}

fn page_to_row(page: &Page) -> Result<Row> {
    if page.payload.len() < 4 {
        return Err(ServerError::NetServerDataReceive);
    }
    let mut bytes = Bytes::copy_from_slice(&page.payload);
    let count_bytes = bytes.split_to(4);
    let count = u32::from_be_bytes(count_bytes.as_ref().try_into().unwrap());
    let mut row = Vec::with_capacity(count as usize);
    for _ in 0..count {
        row.push(wire_to_literal(WireValue::unpack(&mut bytes)?));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::InMemoryExecutor;
    use crate::typecheck::{BinaryOp, Expr};
    use std::time::Duration;

    fn lit_plan() -> Plan {
        Plan {
            select_list: vec![Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(Expr::integer(1)),
                right: Box::new(Expr::integer(2)),
            }],
            source: None,
        }
    }

    #[test]
    fn sync_execute_blocks_until_complete_and_peeks_first_page() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let outcome = mgr.prepare_and_execute(lit_plan(), vec![], ExecFlags::Sync).unwrap();
        assert_eq!(outcome.first_page, Some(vec![Literal::Integer(3)]));
        assert_eq!(mgr.sync_query(outcome.query_id, true).unwrap(), outcome.list_id);
    }

    #[test]
    fn get_list_file_page_round_trips_through_wire_codec() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let outcome = mgr.prepare_and_execute(lit_plan(), vec![], ExecFlags::Sync).unwrap();
        let row = mgr.get_list_file_page(outcome.query_id, 0, 0).unwrap();
        assert_eq!(row, vec![Literal::Integer(3)]);
    }

    #[test]
    fn cache_time_match_returns_empty_carrier() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let id = PlanId([1u8; 32]);
        mgr.install_plan(id, lit_plan());
        let first = mgr.execute_query(id, vec![], ExecFlags::Sync, None).unwrap();
        let second = mgr.execute_query(id, vec![], ExecFlags::Sync, Some(first.server_cache_time)).unwrap();
        assert!(second.first_page.is_none());
        assert_eq!(second.server_cache_time, first.server_cache_time);
    }

    #[test]
    fn execute_unknown_plan_id_is_invalid_xasl_node() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let err = mgr.execute_query(PlanId([9u8; 32]), vec![], ExecFlags::Sync, None).unwrap_err();
        assert_eq!(err, ServerError::InvalidXaslNode);
    }

    #[test]
    fn end_query_is_idempotent() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let outcome = mgr.prepare_and_execute(lit_plan(), vec![], ExecFlags::Sync).unwrap();
        mgr.end_query(outcome.query_id);
        mgr.end_query(outcome.query_id);
        assert_eq!(mgr.sync_query(outcome.query_id, false).unwrap_err(), ServerError::InvalidSession);
    }

    #[test]
    fn async_query_streams_pages_after_interrupt_checks() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let plan = Plan {
            select_list: vec![Expr::Column { name: "x".into(), ty: crate::typecheck::Tag::Integer }],
            source: Some(crate::plan::TableSource {
                columns: vec!["x".into()],
                rows: vec![vec![Literal::Integer(1)], vec![Literal::Integer(2)], vec![Literal::Integer(3)]],
            }),
        };
        let outcome = mgr.prepare_and_execute(plan, vec![], ExecFlags::Async).unwrap();
        assert_eq!(outcome.first_page, Some(vec![Literal::Integer(1)]));
        let second = mgr.get_list_file_page(outcome.query_id, 0, 1).unwrap();
        assert_eq!(second, vec![Literal::Integer(2)]);
        mgr.sync_query(outcome.query_id, true).unwrap();
    }

    #[test]
    fn interrupt_on_unknown_query_is_invalid_session() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        assert_eq!(mgr.interrupt(999).unwrap_err(), ServerError::InvalidSession);
    }

    #[test]
    fn zero_row_result_completes_without_a_first_page() {
        let mgr = QueryManager::new(Arc::new(InMemoryExecutor), 4);
        let plan = Plan {
            select_list: vec![Expr::integer(1)],
            source: Some(crate::plan::TableSource { columns: vec![], rows: vec![] }),
        };
        let outcome = mgr.prepare_and_execute(plan, vec![], ExecFlags::Sync).unwrap();
        assert!(outcome.first_page.is_none());
    }

    #[test]
    fn deadlock_abort_freezes_the_error_for_later_ack() {
        let mgr = QueryManager::new(Arc::new(AbortingExecutor), 4);
        let outcome = mgr.prepare_and_execute(Plan::default(), vec![], ExecFlags::Sync).unwrap();
        assert_eq!(mgr.query_error(outcome.query_id).unwrap(), Some(ServerError::LkUnilaterallyAborted));
        mgr.ack_query_error(outcome.query_id).unwrap();
        assert_eq!(mgr.query_error(outcome.query_id).unwrap(), None);
    }

    struct AbortingExecutor;
    impl PlanExecutor for AbortingExecutor {
        fn execute(&self, _plan: &Plan, _host_vars: &[Literal]) -> Result<Vec<Row>> {
            Err(ServerError::LkUnilaterallyAborted)
        }
    }
}
