//! Control-channel listener
//!
//! The control listener is always up. Control sessions are served one at a
//! time; a starter connecting while another session is live waits in the
//! accept backlog until the previous session tears down.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use bh_core::config::RedirectorConfig;

use crate::server::control;
use crate::state::RedirectorState;

/// Public-facing daemon accepting the starter's control connection
pub struct Redirector {
    /// Shared redirector state
    state: Arc<RedirectorState>,
    /// Bound control listener
    listener: TcpListener,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl Redirector {
    /// Bind the control listener
    pub async fn bind(config: RedirectorConfig, cancel: CancellationToken) -> Result<Self> {
        let bind_addr = (config.bind_address.as_str(), config.listen);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind control listener on {}:{}", config.bind_address, config.listen))?;

        Ok(Self {
            state: Arc::new(RedirectorState::new(config)),
            listener,
            cancel,
        })
    }

    /// Address the control listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the redirector until cancelled
    pub async fn run(self) -> Result<()> {
        tracing::info!("Control listener on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Redirector shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            tracing::info!("Control connection from {}", peer);
                            if let Err(e) = control::run_control_session(
                                Arc::clone(&self.state),
                                socket,
                                peer,
                                &self.cancel,
                            )
                            .await
                            {
                                tracing::warn!(
                                    "Control session from {} ended with error: {}",
                                    peer,
                                    e
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept control connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
