//! Request and frame handlers.

use crate::auth::CredentialValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::ConfigStore;
use cfgsync_protocol::{ClientFrame, ConfigSnapshot, ServerFrame, UpdateBatch};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Identifies one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Configuration store (shared across all handlers).
    pub store: Arc<ConfigStore>,
    validator: Option<CredentialValidator>,
    sessions: RwLock<HashMap<SessionId, LiveSession>>,
    next_session: AtomicU64,
}

/// A connected live client.
#[derive(Debug)]
struct LiveSession {
    outbound: mpsc::UnboundedSender<ServerFrame>,
    authenticated: bool,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<ConfigStore>) -> Self {
        let validator = config.auth.clone().map(CredentialValidator::new);
        Self {
            config,
            store,
            validator,
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Returns true if live writes need credentials.
    pub fn requires_auth(&self) -> bool {
        self.validator.is_some()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn send_to(&self, id: SessionId, frame: ServerFrame) -> ServerResult<()> {
        let sessions = self.sessions.read();
        let session = sessions.get(&id).ok_or(ServerError::UnknownSession(id.0))?;
        if session.outbound.send(frame).is_err() {
            debug!(%id, "session outbound closed");
        }
        Ok(())
    }

    /// Sends `frame` to every session except `except`.
    fn broadcast(&self, frame: &ServerFrame, except: Option<SessionId>) -> usize {
        let sessions = self.sessions.read();
        sessions
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .filter(|(_, session)| session.outbound.send(frame.clone()).is_ok())
            .count()
    }
}

/// Handler for configuration requests and live frames.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a configuration read.
    pub fn handle_read(&self) -> ServerResult<ConfigSnapshot> {
        Ok(self.context.store.snapshot())
    }

    /// Handles a configuration write from the HTTP endpoint.
    ///
    /// The write is pushed to every live session.
    pub fn handle_write(&self, batch: UpdateBatch) -> ServerResult<u64> {
        self.check_batch(&batch)?;
        let revision = self.context.store.apply(&batch);
        let reached = self
            .context
            .broadcast(&ServerFrame::Message(batch), None);
        info!(revision, sessions = reached, "config written");
        Ok(revision)
    }

    /// Registers a live session and pushes the capability snapshot to it.
    pub fn open_session(
        &self,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) -> ServerResult<SessionId> {
        let max = self.context.config.max_sessions;
        let id = {
            let mut sessions = self.context.sessions.write();
            if sessions.len() >= max {
                return Err(ServerError::TooManySessions(max));
            }
            let id = SessionId(self.context.next_session.fetch_add(1, Ordering::SeqCst));
            sessions.insert(
                id,
                LiveSession {
                    outbound,
                    authenticated: false,
                },
            );
            id
        };

        let capabilities = self
            .context
            .store
            .select(&self.context.config.capability_fields);
        self.context.send_to(id, ServerFrame::Config(capabilities))?;
        info!(%id, "session opened");
        Ok(id)
    }

    /// Removes a session. Unknown ids are ignored.
    pub fn close_session(&self, id: SessionId) {
        if self.context.sessions.write().remove(&id).is_some() {
            info!(%id, "session closed");
        }
    }

    /// Handles one frame from a live session.
    ///
    /// Wrong credentials answer with `reject` and keep the session open.
    /// Writes from a session that has not authenticated answer with `err`.
    pub fn handle_frame(&self, id: SessionId, frame: ClientFrame) -> ServerResult<()> {
        match frame {
            ClientFrame::Auth(credentials) => {
                let outcome = match &self.context.validator {
                    Some(validator) => validator.validate(&credentials),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => {
                        self.set_authenticated(id, true)?;
                        debug!(%id, "session authenticated");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(%id, error = %err, "rejecting credentials");
                        self.set_authenticated(id, false)?;
                        self.context.send_to(id, ServerFrame::Reject)
                    }
                }
            }
            ClientFrame::Message(batch) => {
                let authenticated = self.is_authenticated(id)?;
                if self.context.requires_auth() && !authenticated {
                    self.context
                        .send_to(id, ServerFrame::Err("not authenticated".into()))?;
                    return Err(ServerError::NotAuthorized(id.to_string()));
                }
                if let Err(err) = self.check_batch(&batch) {
                    self.context.send_to(id, ServerFrame::Err(err.to_string()))?;
                    return Err(err);
                }

                let summary = batch
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let revision = self.context.store.apply(&batch);
                let reached = self
                    .context
                    .broadcast(&ServerFrame::Message(batch), Some(id));
                info!(%id, revision, sessions = reached, "config written");
                self.context
                    .send_to(id, ServerFrame::Log(format!("config: {summary}")))
            }
        }
    }

    fn check_batch(&self, batch: &UpdateBatch) -> ServerResult<()> {
        let max = self.context.config.max_batch;
        if batch.is_empty() {
            return Err(ServerError::InvalidRequest("empty write".into()));
        }
        if batch.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many fields: {} > {max}",
                batch.len()
            )));
        }
        Ok(())
    }

    fn is_authenticated(&self, id: SessionId) -> ServerResult<bool> {
        self.context
            .sessions
            .read()
            .get(&id)
            .map(|s| s.authenticated)
            .ok_or(ServerError::UnknownSession(id.0))
    }

    fn set_authenticated(&self, id: SessionId, authenticated: bool) -> ServerResult<()> {
        let mut sessions = self.context.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or(ServerError::UnknownSession(id.0))?;
        session.authenticated = authenticated;
        Ok(())
    }
}
