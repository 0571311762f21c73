//! # cfgsync Server
//!
//! Reference configuration server for cfgsync clients.
//!
//! This crate provides:
//! - The configuration endpoint (`GET`/`PATCH {prefix}/api/v1/config`)
//! - Live channel sessions speaking the `{prefix}/config` frame protocol
//! - Credential checking for the `auth` handshake (SHA-256 digests)
//! - Broadcast of accepted writes to every other live session
//!
//! # Architecture
//!
//! The server holds one [`ConfigStore`]. Writes from either surface are
//! applied to it and pushed to live sessions as `message` frames. The
//! transport itself (HTTP framework, WebSocket library) is left to the
//! embedding application, which feeds requests and frames into
//! [`ConfigServer`].
//!
//! # Authentication
//!
//! ```rust,ignore
//! use cfgsync_server::{AuthConfig, ConfigServer, ServerConfig};
//!
//! let config = ServerConfig::default().with_auth(AuthConfig::new("root", "toor"));
//! let server = ConfigServer::new(config);
//! ```
//!
//! With authentication enabled, a session must send valid credentials
//! before its `message` frames are accepted. Wrong credentials get a
//! `reject` frame; the session stays open.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, CredentialValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, SessionId};
pub use server::ConfigServer;
pub use store::ConfigStore;
