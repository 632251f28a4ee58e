//! Adapter registry and connection cache.
//!
//! Backends are registered in preference order. Opening a database picks
//! the configured backend, or the first valid one, and caches one
//! connection per database name so every handle shares it. Opens, closes
//! and destroys run one at a time through a task queue, so concurrent
//! opens of the same name converge on a single connection.

use crate::adapter::Adapter;
use crate::config::Config;
use crate::connection::Connection;
use crate::database::{join_failure, Database};
use crate::error::{CoreError, CoreResult};
use crate::queue::TaskQueue;
use parking_lot::{Mutex, RwLock};
use sofadb_storage::{Backend, MemoryBackend};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registered backends plus the connections opened through them.
pub struct Registry {
    backends: RwLock<Vec<Arc<dyn Backend>>>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    queue: TaskQueue,
    config: Config,
}

impl Registry {
    /// Creates a registry with no backends.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            backends: RwLock::new(Vec::new()),
            connections: Mutex::new(HashMap::new()),
            queue: TaskQueue::new("registry"),
            config,
        })
    }

    /// Creates a registry serving databases from memory.
    #[must_use]
    pub fn with_memory() -> Arc<Self> {
        let registry = Self::new(Config::default());
        registry.register(Arc::new(MemoryBackend::new()));
        registry
    }

    /// Appends a backend to the preference list.
    pub fn register(&self, backend: Arc<dyn Backend>) {
        debug!(adapter = backend.name(), "registered adapter");
        self.backends.write().push(backend);
    }

    /// Names of the usable backends, most preferred first.
    #[must_use]
    pub fn adapters(&self) -> Vec<&'static str> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.valid())
            .map(|b| b.name())
            .collect()
    }

    /// The registry's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true if a live connection to `name` is cached.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.cached(name).is_some()
    }

    /// Opens (creating if needed) the database `name`.
    ///
    /// # Errors
    ///
    /// Returns `bad_request` for an empty name or when no usable backend is
    /// registered, or the error that prevented opening the store.
    pub async fn open(self: &Arc<Self>, name: &str) -> CoreResult<Database> {
        if name.is_empty() {
            return Err(CoreError::bad_request("database name must not be empty"));
        }
        let conn = self.connect(name).await?;
        Ok(Database::new(Arc::clone(self), name, conn))
    }

    /// Returns the cached connection for `name`, opening one if needed.
    pub(crate) async fn connect(&self, name: &str) -> CoreResult<Arc<Connection>> {
        self.queue
            .run(|| async {
                if let Some(conn) = self.cached(name) {
                    return Ok(conn);
                }
                let backend = self.select_backend()?;
                let config = self.config.clone();
                let db_name = name.to_string();
                let opener = Arc::clone(&backend);
                let adapter = tokio::task::spawn_blocking(move || {
                    let engine = opener.open(&db_name)?;
                    Adapter::open(engine, config)
                })
                .await
                .map_err(join_failure)??;

                let conn = Arc::new(Connection::new(backend.name(), adapter));
                self.connections
                    .lock()
                    .insert(name.to_string(), Arc::clone(&conn));
                info!(db = name, adapter = backend.name(), "connected");
                Ok(conn)
            })
            .await
    }

    fn cached(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .get(name)
            .filter(|c| !c.is_invalid() && !c.is_closed())
            .cloned()
    }

    fn select_backend(&self) -> CoreResult<Arc<dyn Backend>> {
        let backends = self.backends.read();
        let found = match &self.config.adapter {
            Some(wanted) => backends
                .iter()
                .find(|b| b.name() == wanted.as_str() && b.valid()),
            None => backends.iter().find(|b| b.valid()),
        };
        match (found, &self.config.adapter) {
            (Some(backend), _) => Ok(Arc::clone(backend)),
            (None, Some(wanted)) => Err(CoreError::bad_request(format!(
                "adapter {wanted} is not registered or not usable"
            ))),
            (None, None) => Err(CoreError::bad_request("no usable adapter is registered")),
        }
    }

    fn backend_named(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    /// Drops a failed connection so the next use reopens.
    pub(crate) fn invalidate(&self, name: &str, conn: &Arc<Connection>) {
        {
            let mut connections = self.connections.lock();
            if connections.get(name).is_some_and(|c| Arc::ptr_eq(c, conn)) {
                connections.remove(name);
            }
        }
        conn.invalidate();
        warn!(db = name, "connection lost, will reopen on next use");
    }

    /// Closes `name`. Every handle to it fails with `database_closed`.
    ///
    /// # Errors
    ///
    /// Returns `database_closed` if the registry itself is shutting down.
    pub async fn close(&self, name: &str) -> CoreResult<()> {
        self.queue
            .run(|| async {
                let removed = self.connections.lock().remove(name);
                if let Some(conn) = removed {
                    conn.close();
                    info!(db = name, "closed database");
                }
                Ok(())
            })
            .await
    }

    /// Closes `conn`, and `name` too while `conn` is still its cached
    /// connection. A stale handle never closes its replacement.
    pub(crate) async fn close_connection(&self, name: &str, conn: &Arc<Connection>) -> CoreResult<()> {
        conn.close();
        self.queue
            .run(|| async {
                let mut connections = self.connections.lock();
                if connections.get(name).is_some_and(|c| Arc::ptr_eq(c, conn)) {
                    connections.remove(name);
                    info!(db = name, "closed database");
                }
                Ok(())
            })
            .await
    }

    /// Closes `name` and deletes its stored data.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot remove the store.
    pub async fn destroy(&self, name: &str) -> CoreResult<()> {
        self.destroy_with(name, None).await
    }

    pub(crate) async fn destroy_connection(
        &self,
        name: &str,
        conn: &Arc<Connection>,
    ) -> CoreResult<()> {
        conn.close();
        self.destroy_with(name, Some(conn.backend())).await
    }

    async fn destroy_with(&self, name: &str, hint: Option<&'static str>) -> CoreResult<()> {
        self.queue
            .run(|| async {
                let removed = self.connections.lock().remove(name);
                let owner = match &removed {
                    Some(conn) => {
                        conn.close();
                        Some(conn.backend())
                    }
                    None => hint,
                };
                let backend = match owner.and_then(|n| self.backend_named(n)) {
                    Some(backend) => backend,
                    None => self.select_backend()?,
                };
                let db_name = name.to_string();
                let adapter = backend.name();
                tokio::task::spawn_blocking(move || backend.destroy(&db_name))
                    .await
                    .map_err(join_failure)??;
                info!(db = name, adapter, "destroyed database");
                Ok(())
            })
            .await
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("adapters", &self.adapters())
            .field("open", &self.connections.lock().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
