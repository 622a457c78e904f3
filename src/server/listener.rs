//! TCP accept loop and connection registry.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::ServerConfig;
use super::connection::{serve_connection, ConnectionContext, ConnectionHandle};
use super::engine::{Authentication, DatabaseService};
use super::error::ServerResult;
use crate::bolt::error::BoltError;

/// Live connections by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        self.connections.lock().insert(handle.id().to_string(), handle);
    }

    pub fn deregister(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Ids of all live connections, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ask every connection to stop its running statement.
    pub fn terminate_all(&self) {
        for handle in self.connections.lock().values() {
            handle.terminate();
        }
    }
}

/// Bolt server bound to a TCP address.
pub struct BoltServer {
    listener: TcpListener,
    ctx: ConnectionContext,
    registry: Arc<ConnectionRegistry>,
}

impl BoltServer {
    /// Bind the configured listen address.
    pub async fn bind(
        config: ServerConfig,
        auth: Arc<dyn Authentication>,
        database: Arc<dyn DatabaseService>,
    ) -> ServerResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_address).await?;
        info!(
            address = %listener.local_addr()?,
            agent = %config.server_agent,
            database = database.version(),
            "Bolt server listening"
        );
        Ok(Self {
            listener,
            ctx: ConnectionContext {
                config: Arc::new(config),
                auth,
                database,
            },
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` completes, then close every open
    /// connection and wait for them to finish.
    pub async fn run_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        let mut next_id: u64 = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(remote = %remote, error = %e, "failed to set TCP_NODELAY");
                        }
                        next_id += 1;
                        let handle = Arc::new(ConnectionHandle::new(format!("bolt-{}", next_id), remote));
                        self.registry.register(Arc::clone(&handle));
                        info!(connection_id = %handle.id(), remote = %remote, "connection accepted");

                        let ctx = self.ctx.clone();
                        let registry = Arc::clone(&self.registry);
                        let shutdown = shutdown_rx.clone();
                        connections.spawn(async move {
                            match serve_connection(stream, Arc::clone(&handle), ctx, shutdown).await {
                                Ok(()) => {}
                                Err(BoltError::Handshake(e)) => {
                                    warn!(connection_id = %handle.id(), error = %e, "handshake failed")
                                }
                                Err(e) => debug!(connection_id = %handle.id(), error = %e, "connection ended with error"),
                            }
                            registry.deregister(handle.id());
                            info!(connection_id = %handle.id(), "connection closed");
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!(connections = self.registry.len(), "shutting down");
        shutdown_tx.send_replace(true);
        self.registry.terminate_all();
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "connection task failed");
            }
        }
        info!("server stopped");
        Ok(())
    }
}
