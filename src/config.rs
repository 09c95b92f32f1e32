//! Process-wide configuration, read once at start-up and shared behind an
//! `Arc` by every connection handler. Replaces the original's global
//! mutable state (`db_on_server`, `boot_Host_name`, `PRM_*` parameters)
//! with an explicit value per DESIGN.md.

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompatMode {
    Cubrid,
    Mysql,
    Oracle,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "meridiandb-server", about = "Relational database server core")]
pub struct ServerConfig {
    /// Maximum number of entries the XASL plan cache may hold. 0 disables
    /// the cache: prepare always falls through to client-side compile/retry.
    #[arg(long, default_value_t = 1000)]
    pub plan_cache_max_entries: usize,

    /// A cached plan byte stream larger than this is refused with
    /// `OutOfVirtualMemory`.
    #[arg(long, default_value_t = 1 << 20)]
    pub xasl_plan_max_bytes: usize,

    /// Default scale used by the NUMERIC/NUMERIC division formula when the
    /// operands don't otherwise determine one.
    #[arg(long, default_value_t = 9)]
    pub default_division_scale: u8,

    /// Selects dialect-specific type-checker/folder behavior.
    #[arg(long, value_enum, default_value_t = CompatMode::Cubrid)]
    pub compat_mode: CompatMode,

    /// When true, NULL concatenated with an empty string yields the other
    /// operand instead of NULL.
    #[arg(long, default_value_t = false)]
    pub oracle_style_empty_string: bool,

    /// When true, a host variable's expected domain is resolved lazily at
    /// first bind rather than at compile time.
    #[arg(long, default_value_t = false)]
    pub hostvar_late_binding: bool,

    /// Address the server listens on.
    #[arg(long, default_value = "127.0.0.1:1523")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            plan_cache_max_entries: 1000,
            xasl_plan_max_bytes: 1 << 20,
            default_division_scale: 9,
            compat_mode: CompatMode::Cubrid,
            oracle_style_empty_string: false,
            hostvar_late_binding: false,
            listen_addr: "127.0.0.1:1523".parse().unwrap(),
        }
    }
}
