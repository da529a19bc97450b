// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Daemon entry point: single-instance guard, listeners, accept loop,
//! signal-driven graceful shutdown.
//!
//! The Unix socket is the primary transport; its directory permissions are
//! the access control.  An optional localhost TCP listener carries the
//! same framed protocol for frontends that cannot speak Unix sockets.
//!
//! Exit discipline: a clean drain returns `Ok` (exit 0); any failure
//! before the accept loop — config, lockfile contention, listeners — is
//! returned as an error the binary maps to exit 1.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

use skald_config::Config;

use crate::client::handle_connection;
use crate::lockfile::{Lockfile, PidFile};
use crate::state::DaemonState;

/// Default socket location: the user runtime dir when one exists, the
/// state dir otherwise.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("skald")
        .join("daemon.sock")
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let socket_path = config
        .daemon
        .socket_path
        .clone()
        .unwrap_or_else(default_socket_path);
    let socket_dir = socket_path
        .parent()
        .context("socket path has no parent directory")?
        .to_path_buf();

    let state = DaemonState::new(Arc::new(config.clone())).await?;

    // Single-instance enforcement guards the socket directory.
    let lock = Lockfile::acquire(&socket_dir)?;
    let pidfile = PidFile::write(&socket_dir)?;

    // Safe to clear a leftover socket now that the lock is held.
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "daemon listening");

    let tcp = match &config.daemon.tcp_listen {
        Some(addr) => {
            let l = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding tcp {addr}"))?;
            info!(%addr, "daemon listening on tcp");
            Some(l)
        }
        None => None,
    };

    serve(listener, tcp, Arc::clone(&state)).await;

    info!("daemon shutting down");
    state.shutdown().await;
    let _ = std::fs::remove_file(&socket_path);
    pidfile.release();
    lock.release();
    Ok(())
}

/// Accept loop; returns when a termination signal arrives.
async fn serve(listener: UnixListener, tcp: Option<TcpListener>, state: Arc<DaemonState>) {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                }
                Err(e) => warn!("unix accept failed: {e}"),
            },
            accepted = accept_tcp(tcp.as_ref()) => match accepted {
                Ok(stream) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                }
                Err(e) => warn!("tcp accept failed: {e}"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
        }
    }
}

async fn accept_tcp(tcp: Option<&TcpListener>) -> std::io::Result<tokio::net::TcpStream> {
    match tcp {
        Some(listener) => listener.accept().await.map(|(s, _)| s),
        // No TCP listener configured: never resolves, so the select ignores
        // this branch.
        None => std::future::pending().await,
    }
}

/// Test seam: serve an already-bound Unix listener against a prepared
/// state, without lockfiles or signal handling.
#[doc(hidden)]
pub async fn serve_unix_listener(listener: UnixListener, state: Arc<DaemonState>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, Arc::clone(&state)));
            }
            Err(e) => {
                warn!("unix accept failed: {e}");
                break;
            }
        }
    }
}
