//! Crate-wide error type.
//!
//! One flat enum covers every error surface the core must distinguish:
//! session/compile, prepare/execute, wire, and runtime. Handlers propagate
//! `ServerError` with `?`; `dispatch::return_error_to_client` is the only
//! place that turns one into bytes on the wire.

use std::fmt;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    // session / compile surface
    InvalidSession,
    EmptyStatement,
    InvalidArguments(String),
    Syntax(String),
    Semantic(String),
    Execution(String),

    // prepare / execute surface
    IncompatibleDatatype { from: String, to: String },
    DataOverflow { value: String, domain: String },
    MultipleStatement,
    IncorrectHostvarCount { expected: usize, got: usize },
    PreparedNameNotFound(String),
    DisallowedAsPrepared(&'static str),

    // wire surface
    NetServerDataReceive,
    NetDifferentBitPlatform { client: u32, server: u32 },
    NetDifferentRelease { client: String, server: String },
    NetServerHandshake(String),
    WireUnknownTag(u8),

    // runtime surface
    LkUnilaterallyAborted,
    DbNoModifications,
    Interrupted,
    InvalidXaslNode,
    TimeConversion(String),
    ZeroDivide,
    OutOfVirtualMemory,
    Generic(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidSession => write!(f, "invalid session"),
            ServerError::EmptyStatement => write!(f, "empty statement"),
            ServerError::InvalidArguments(m) => write!(f, "invalid arguments: {m}"),
            ServerError::Syntax(m) => write!(f, "syntax error: {m}"),
            ServerError::Semantic(m) => write!(f, "semantic error: {m}"),
            ServerError::Execution(m) => write!(f, "execution error: {m}"),
            ServerError::IncompatibleDatatype { from, to } => {
                write!(f, "cannot coerce {from} to {to}")
            }
            ServerError::DataOverflow { value, domain } => {
                write!(f, "value {value} overflows domain {domain}")
            }
            ServerError::MultipleStatement => write!(f, "multiple statements not allowed here"),
            ServerError::IncorrectHostvarCount { expected, got } => {
                write!(f, "expected {expected} host variables, got {got}")
            }
            ServerError::PreparedNameNotFound(name) => {
                write!(f, "prepared statement '{name}' not found")
            }
            ServerError::DisallowedAsPrepared(what) => {
                write!(f, "{what} cannot itself be prepared")
            }
            ServerError::NetServerDataReceive => write!(f, "error receiving data from client"),
            ServerError::NetDifferentBitPlatform { client, server } => write!(
                f,
                "incompatible bit platform: client={client} server={server}"
            ),
            ServerError::NetDifferentRelease { client, server } => write!(
                f,
                "incompatible release: client={client} server={server}"
            ),
            ServerError::NetServerHandshake(m) => write!(f, "handshake failed: {m}"),
            ServerError::WireUnknownTag(t) => write!(f, "unknown wire tag {t}"),
            ServerError::LkUnilaterallyAborted => write!(f, "transaction unilaterally aborted"),
            ServerError::DbNoModifications => write!(f, "no modifications allowed"),
            ServerError::Interrupted => write!(f, "query interrupted"),
            ServerError::InvalidXaslNode => write!(f, "cached plan is no longer valid"),
            ServerError::TimeConversion(m) => write!(f, "time conversion error: {m}"),
            ServerError::ZeroDivide => write!(f, "division by zero"),
            ServerError::OutOfVirtualMemory => write!(f, "out of virtual memory"),
            ServerError::Generic(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    /// True for the two runtime errors that `return_error_to_client`
    /// gives special handling (unilateral abort, `reset_on_commit` latch).
    pub fn triggers_unilateral_abort(&self) -> bool {
        matches!(
            self,
            ServerError::LkUnilaterallyAborted | ServerError::DbNoModifications
        )
    }

    pub fn sets_reset_on_commit(&self) -> bool {
        matches!(self, ServerError::DbNoModifications)
    }
}
