//! Request dispatch, session, and query execution core for a client/server
//! relational database. See SPEC_FULL.md for the module map; this crate's
//! `server` binary (`src/server/main.rs`) is the only process entry point.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod net;
pub mod plan;
pub mod qmgr;
pub mod session;
pub mod tfile;
pub mod typecheck;
pub mod wire;
pub mod xasl;
