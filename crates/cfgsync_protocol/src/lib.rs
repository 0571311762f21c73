//! # cfgsync Protocol
//!
//! Wire types and JSON codecs for cfgsync.
//!
//! This crate provides:
//! - `FieldValue` / `FieldUpdate` for single configuration writes
//! - `UpdateBatch` for ordered multi-field writes
//! - `ConfigSnapshot` for full configuration reads
//! - Live channel frames (`ClientFrame`, `ServerFrame`)
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Live channel framing
//!
//! Every frame is a JSON object with an `event` name and an optional
//! `data` payload:
//!
//! ```text
//! {"event":"auth","data":{"username":"root","password":"toor"}}
//! {"event":"message","data":{"diff":true}}
//! {"event":"reject"}
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod frames;
mod value;

pub use batch::{ConfigSnapshot, UpdateBatch};
pub use error::{CodecError, CodecResult};
pub use frames::{ClientFrame, Credentials, ServerFrame};
pub use value::{FieldUpdate, FieldValue};

/// Namespace of the live configuration channel, appended to the prefix.
pub const CONFIG_NAMESPACE: &str = "/config";

/// Path of the request/response configuration endpoint, appended to the prefix.
pub const CONFIG_API_PATH: &str = "/api/v1/config";
