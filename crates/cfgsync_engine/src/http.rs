//! HTTP fallback persistence.
//!
//! When the live channel is down, writes go to the configuration endpoint
//! as request/response calls whose outcome is reported to the caller.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.).

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cfgsync_protocol::{ConfigSnapshot, UpdateBatch};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and returns the response body.
    async fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Sends a PATCH request and returns the response body.
    async fn patch(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// The request/response path used when the live channel is unavailable.
#[async_trait]
pub trait FallbackPersistence: Send + Sync {
    /// Reads the full configuration.
    async fn read_snapshot(&self) -> SyncResult<ConfigSnapshot>;

    /// Persists a batch. Returns only once the write is confirmed.
    async fn write(&self, batch: &UpdateBatch) -> SyncResult<()>;
}

/// Fallback persistence over an [`HttpClient`].
///
/// Reads are `GET {url}`, writes are `PATCH {url}` with the batch as a
/// JSON object body.
pub struct HttpPersistence<C: HttpClient> {
    /// Configuration endpoint URL.
    url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpPersistence<C> {
    /// Creates persistence against the configuration endpoint `url`.
    pub fn new(url: impl Into<String>, client: C) -> Self {
        Self {
            url: url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}

#[async_trait]
impl<C: HttpClient> FallbackPersistence for HttpPersistence<C> {
    async fn read_snapshot(&self) -> SyncResult<ConfigSnapshot> {
        let body = self.client.get(&self.url).await.map_err(|e| {
            warn!(url = %self.url, error = %e, "config read failed");
            self.set_error(&e);
            SyncError::ConfigLoadFailed(e)
        })?;
        self.clear_error();
        Ok(ConfigSnapshot::decode(&body)?)
    }

    async fn write(&self, batch: &UpdateBatch) -> SyncResult<()> {
        let body = batch.encode()?.into_bytes();
        debug!(url = %self.url, fields = batch.len(), "fallback write");

        self.client.patch(&self.url, body).await.map_err(|e| {
            warn!(url = %self.url, error = %e, "config write failed");
            self.set_error(&e);
            SyncError::PersistenceWriteFailed(e)
        })?;
        self.clear_error();
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a GET request and returns the response body.
    fn handle_get(&self, path: &str) -> Result<Vec<u8>, String>;

    /// Handles a PATCH request and returns the response body.
    fn handle_patch(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }

    fn path(url: &str) -> &str {
        url.find("/api/").map(|i| &url[i..]).unwrap_or(url)
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        self.server.handle_get(Self::path(url))
    }

    async fn patch(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        self.server.handle_patch(Self::path(url), &body)
    }
}

/// In-memory fallback persistence (for testing).
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<ConfigSnapshot>,
    writes: Mutex<Vec<UpdateBatch>>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl MemoryPersistence {
    /// Creates persistence holding `snapshot`.
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Makes subsequent reads fail or succeed.
    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    /// Makes subsequent writes fail or succeed.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Returns every batch written successfully.
    pub fn writes(&self) -> Vec<UpdateBatch> {
        self.writes.lock().clone()
    }

    /// Returns the stored configuration.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.snapshot.lock().clone()
    }
}

#[async_trait]
impl FallbackPersistence for MemoryPersistence {
    async fn read_snapshot(&self) -> SyncResult<ConfigSnapshot> {
        if *self.fail_reads.lock() {
            return Err(SyncError::ConfigLoadFailed("read refused".into()));
        }
        Ok(self.snapshot.lock().clone())
    }

    async fn write(&self, batch: &UpdateBatch) -> SyncResult<()> {
        if *self.fail_writes.lock() {
            return Err(SyncError::PersistenceWriteFailed("write refused".into()));
        }
        self.snapshot.lock().apply_batch(batch);
        self.writes.lock().push(batch.clone());
        Ok(())
    }
}

#[async_trait]
impl<T: FallbackPersistence + ?Sized> FallbackPersistence for std::sync::Arc<T> {
    async fn read_snapshot(&self) -> SyncResult<ConfigSnapshot> {
        (**self).read_snapshot().await
    }

    async fn write(&self, batch: &UpdateBatch) -> SyncResult<()> {
        (**self).write(batch).await
    }
}
