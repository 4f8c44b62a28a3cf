//! Control server (C3, §4.3): the TCP accept loop. One session task per
//! accepted socket; a broadcast `shutdown` signal tells every session to
//! wind down, and the server waits up to `shutdown_grace` for them to drain
//! their outboxes before returning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::coordinator::CoordinatorHandle;

pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    coordinator: CoordinatorHandle,
}

impl Server {
    pub async fn bind(config: Arc<Config>, coordinator: CoordinatorHandle) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!(host = %config.host, port = config.port, "listening");
        Ok(Self { listener, config, coordinator })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires, then waits up to
    /// `shutdown_grace` for in-flight sessions to finish before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let next_id = AtomicU64::new(1);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let id = next_id.fetch_add(1, Ordering::Relaxed);
                            info!(id, %peer, "session accepted");
                            let config = self.config.clone();
                            let coordinator = self.coordinator.clone();
                            sessions.spawn(crate::session::run(id, socket, config, coordinator, shutdown.clone()));
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
            }
        }

        info!(pending = sessions.len(), "draining sessions");
        let grace = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    warn!(remaining = sessions.len(), "shutdown grace period elapsed, abandoning sessions");
                    sessions.shutdown().await;
                    break;
                }
                joined = sessions.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }
    }
}
