//! The control server's TCP accept loop: binds `Config::control_port` and
//! spawns one [`crate::connection::serve`] task per accepted socket.

use crate::flags::SharedFlags;
use shepherd_core::{Config, Result};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Accept connections on `cfg.control_port` until the returned task is
/// aborted or the listener itself fails to bind. Each connection is
/// served against the state directory at `state_dir`, sharing one
/// [`SharedFlags`] across every connection and the master loop.
pub async fn run(cfg: Config, flags: SharedFlags, state_dir: PathBuf) -> Result<()> {
    let addr = format!("0.0.0.0:{}", cfg.control_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "control server listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let cfg = cfg.clone();
        let flags = flags.clone();
        let state_dir = state_dir.clone();
        tokio::spawn(async move {
            crate::connection::serve(socket, peer.ip(), cfg, flags, state_dir).await;
        });
    }
}
