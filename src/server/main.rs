//! `meridiandb-server` binary: parses `ServerConfig`, binds the listening
//! socket, and drives one `Dispatcher` per process across every accepted
//! connection. See SPEC_FULL §2.1/§2.3 and spec.md §4.2/§4.3.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use meridiandb::config::ServerConfig;
use meridiandb::dispatch::Dispatcher;
use meridiandb::net::Connection;

#[tokio::main]
async fn main() {
    let cfg = Arc::new(ServerConfig::parse());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = match TcpListener::bind(cfg.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %cfg.listen_addr, error = %e, "failed to bind listen address");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.listen_addr, "meridiandb-server listening");

    let dispatcher = Arc::new(Dispatcher::new(cfg.clone()));

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((socket, peer)) => {
                        debug!(%peer, "accepted connection");
                        let dispatcher = dispatcher.clone();
                        let server_host = cfg.listen_addr.to_string();
                        tokio::spawn(async move {
                            run_connection(dispatcher, socket, server_host, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
}

/// Reads and dispatches requests for one connection until the client
/// disconnects or a transport-level error ends the stream. Per-request
/// errors are turned into wire replies by `Dispatcher::dispatch` itself
/// and never reach this loop.
async fn run_connection(
    dispatcher: Arc<Dispatcher>,
    socket: tokio::net::TcpStream,
    server_host: String,
    peer: std::net::SocketAddr,
) {
    let mut conn = Connection::new(socket, server_host);
    loop {
        let pdu = match conn.read_pdu().await {
            Ok(pdu) => pdu,
            Err(_) => {
                debug!(%peer, "connection closed");
                return;
            }
        };
        if let Err(e) = dispatcher.dispatch(&mut conn, pdu).await {
            error!(%peer, error = %e, "connection-level failure, dropping connection");
            return;
        }
    }
}
