//! Main configuration server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, SessionId};
use crate::store::ConfigStore;
use cfgsync_protocol::{ClientFrame, ConfigSnapshot, ServerFrame, UpdateBatch, CONFIG_API_PATH};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The configuration server.
///
/// This server holds the authoritative configuration and serves it over
/// two surfaces: the HTTP endpoint and live channel sessions.
///
/// # Example
///
/// ```
/// use cfgsync_server::{ConfigServer, ServerConfig};
///
/// let server = ConfigServer::new(ServerConfig::default());
///
/// // In a real application, you would expose HTTP routes and a WebSocket
/// // namespace that call handle_get(), handle_patch() and handle_frame()
/// let body = server.handle_get("/api/v1/config").unwrap();
/// assert_eq!(body, b"{}");
/// ```
pub struct ConfigServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl ConfigServer {
    /// Creates a new configuration server.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(ConfigStore::new(config.initial.clone()));
        Self::with_store(config, store)
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ConfigStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles `GET {path}`. Returns the configuration as a JSON object.
    pub fn handle_get(&self, path: &str) -> Result<Vec<u8>, String> {
        self.route(path)
            .and_then(|()| self.handler.handle_read())
            .and_then(|snapshot| Ok(snapshot.encode()?))
            .map_err(|e| e.to_string())
    }

    /// Handles `PATCH {path}` with a JSON object body.
    pub fn handle_patch(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.route(path)
            .and_then(|()| Ok(UpdateBatch::decode(body)?))
            .and_then(|batch| self.handler.handle_write(batch))
            .map(|_| b"config: saved".to_vec())
            .map_err(|e| e.to_string())
    }

    /// Opens a live session whose frames are sent to `outbound`.
    pub fn open_session(
        &self,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) -> ServerResult<SessionId> {
        self.handler.open_session(outbound)
    }

    /// Handles one frame from a live session.
    pub fn handle_frame(&self, id: SessionId, frame: ClientFrame) -> ServerResult<()> {
        self.handler.handle_frame(id, frame)
    }

    /// Handles one JSON text frame from a live session.
    pub fn handle_text(&self, id: SessionId, text: &str) -> ServerResult<()> {
        let frame = ClientFrame::decode(text)?;
        self.handle_frame(id, frame)
    }

    /// Closes a live session.
    pub fn close_session(&self, id: SessionId) {
        self.handler.close_session(id);
    }

    /// Number of open live sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }

    /// Current configuration revision.
    pub fn revision(&self) -> u64 {
        self.context.store.revision()
    }

    /// Current configuration.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.context.store.snapshot()
    }

    fn route(&self, path: &str) -> ServerResult<()> {
        let path = path.split('?').next().unwrap_or(path);
        if path.ends_with(CONFIG_API_PATH) {
            Ok(())
        } else {
            Err(ServerError::NotFound(path.to_string()))
        }
    }
}
