//! # cfgsync Engine
//!
//! Configuration synchronization engine.
//!
//! This crate provides:
//! - Typed field registry (schema resolved once at startup)
//! - Field store mirroring displayed/persisted configuration
//! - Cross-field dependency rules (group, requires, gate, conditional)
//! - Dual transport: live push channel with an HTTP fallback
//! - Reconnect with capped exponential backoff
//! - Sync engine with a single event-driven dispatch loop
//!
//! ## Architecture
//!
//! ```text
//! presentation ──RawInput──► SyncEngine ──rules──► FieldStore
//!      ▲                        │   ▲
//!      │ on_apply / on_warn     │   │ TransportEvent queue
//!      └────────────────────────┘   │
//!                               TransportChannel
//!                              live ◄──► fallback
//! ```
//!
//! ## Key Invariants
//!
//! - The store is only mutated by the engine after a successful apply
//! - While connected, writes go over the live channel (fire-and-forget)
//! - Otherwise writes go over the fallback and are applied only on success
//! - Remote updates are applied as-is, without local rule evaluation
//! - Rules force at most one level of corrections
//! - No failure is fatal to the engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod defaults;
mod error;
mod handle;
mod http;
mod presentation;
mod registry;
mod rules;
mod state;
mod store;
mod transport;

pub use config::{ForcedUpdatePolicy, ReconnectConfig, SyncConfig};
pub use defaults::{standard_registry, standard_rules};
pub use error::{ConfigError, SyncError, SyncResult};
pub use handle::{EngineCommand, EngineHandle};
pub use http::{
    FallbackPersistence, HttpClient, HttpPersistence, LoopbackClient, LoopbackServer,
    MemoryPersistence,
};
pub use presentation::{Notice, Presentation, PresentationEvent, RecordingPresentation};
pub use registry::{FieldKind, FieldRegistry, FieldRegistryBuilder, InputValue, RawInput};
pub use rules::{
    Condition, DependencyRule, DependencyRules, Evaluation, RuleAction, RuleOutcome, UiEffect,
};
pub use state::{EnginePhase, EngineStats, SyncEngine};
pub use store::FieldStore;
pub use transport::{
    ActivePath, Delivery, LiveConnector, LiveLink, LivePeer, LiveSender, MockConnector,
    MockConnectorHandle, SessionState, TransportChannel, TransportEvent, TransportEvents,
};

pub use cfgsync_protocol::{
    ClientFrame, ConfigSnapshot, Credentials, FieldUpdate, FieldValue, ServerFrame, UpdateBatch,
};
