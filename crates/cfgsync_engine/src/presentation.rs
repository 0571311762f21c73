//! Presentation callbacks.
//!
//! The engine never touches controls directly. Everything the user
//! should see goes through a [`Presentation`] implementation.

use cfgsync_protocol::{ConfigSnapshot, FieldValue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The server rejected the credentials.
    AuthRejected,
    /// A fallback write failed.
    SaveFailed,
    /// The configuration could not be read.
    LoadFailed,
    /// The server reported an error.
    Server(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::AuthRejected => f.write_str("Wrong credentials!"),
            Notice::SaveFailed => f.write_str("Could not save config!"),
            Notice::LoadFailed => f.write_str("Could not load config!"),
            Notice::Server(message) => f.write_str(message),
        }
    }
}

/// Receives display updates from the engine.
pub trait Presentation: Send + Sync {
    /// A field value changed.
    fn on_apply(&self, name: &str, value: &FieldValue);

    /// A dependency rule warned.
    fn on_warn(&self, message: &str);

    /// Loading started or finished.
    fn on_loading_changed(&self, loading: bool);

    /// Something went wrong that the user should know about.
    fn on_notice(&self, notice: &Notice);

    /// A control was enabled or disabled.
    fn on_field_enabled(&self, _name: &str, _enabled: bool) {}

    /// The dialog was shown or hidden.
    fn on_visibility_changed(&self, _visible: bool) {}

    /// The server pushed its capability snapshot.
    fn on_server_config(&self, _snapshot: &ConfigSnapshot) {}

    /// Client-side storage was allowed or denied.
    fn on_storage_allowed(&self, _allowed: bool) {}

    /// The server sent a log entry.
    fn on_log(&self, _entry: &str) {}
}

impl<P: Presentation + ?Sized> Presentation for Arc<P> {
    fn on_apply(&self, name: &str, value: &FieldValue) {
        (**self).on_apply(name, value)
    }

    fn on_warn(&self, message: &str) {
        (**self).on_warn(message)
    }

    fn on_loading_changed(&self, loading: bool) {
        (**self).on_loading_changed(loading)
    }

    fn on_notice(&self, notice: &Notice) {
        (**self).on_notice(notice)
    }

    fn on_field_enabled(&self, name: &str, enabled: bool) {
        (**self).on_field_enabled(name, enabled)
    }

    fn on_visibility_changed(&self, visible: bool) {
        (**self).on_visibility_changed(visible)
    }

    fn on_server_config(&self, snapshot: &ConfigSnapshot) {
        (**self).on_server_config(snapshot)
    }

    fn on_storage_allowed(&self, allowed: bool) {
        (**self).on_storage_allowed(allowed)
    }

    fn on_log(&self, entry: &str) {
        (**self).on_log(entry)
    }
}

/// One recorded presentation callback.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    /// `on_apply`.
    Apply(String, FieldValue),
    /// `on_warn`.
    Warn(String),
    /// `on_loading_changed`.
    Loading(bool),
    /// `on_notice`.
    Notice(Notice),
    /// `on_field_enabled`.
    FieldEnabled(String, bool),
    /// `on_visibility_changed`.
    Visible(bool),
    /// `on_server_config`.
    ServerConfig(ConfigSnapshot),
    /// `on_storage_allowed`.
    StorageAllowed(bool),
    /// `on_log`.
    Log(String),
}

/// A presentation that records every callback (for testing).
#[derive(Debug, Default)]
pub struct RecordingPresentation {
    events: Mutex<Vec<PresentationEvent>>,
}

impl RecordingPresentation {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<PresentationEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the recorded events.
    pub fn take(&self) -> Vec<PresentationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Recorded `on_apply` calls.
    pub fn applied(&self) -> Vec<(String, FieldValue)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PresentationEvent::Apply(name, value) => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Recorded warnings.
    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PresentationEvent::Warn(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded notices.
    pub fn notices(&self) -> Vec<Notice> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PresentationEvent::Notice(notice) => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PresentationEvent) {
        self.events.lock().push(event);
    }
}

impl Presentation for RecordingPresentation {
    fn on_apply(&self, name: &str, value: &FieldValue) {
        self.record(PresentationEvent::Apply(name.to_string(), value.clone()));
    }

    fn on_warn(&self, message: &str) {
        self.record(PresentationEvent::Warn(message.to_string()));
    }

    fn on_loading_changed(&self, loading: bool) {
        self.record(PresentationEvent::Loading(loading));
    }

    fn on_notice(&self, notice: &Notice) {
        self.record(PresentationEvent::Notice(notice.clone()));
    }

    fn on_field_enabled(&self, name: &str, enabled: bool) {
        self.record(PresentationEvent::FieldEnabled(name.to_string(), enabled));
    }

    fn on_visibility_changed(&self, visible: bool) {
        self.record(PresentationEvent::Visible(visible));
    }

    fn on_server_config(&self, snapshot: &ConfigSnapshot) {
        self.record(PresentationEvent::ServerConfig(snapshot.clone()));
    }

    fn on_storage_allowed(&self, allowed: bool) {
        self.record(PresentationEvent::StorageAllowed(allowed));
    }

    fn on_log(&self, entry: &str) {
        self.record(PresentationEvent::Log(entry.to_string()));
    }
}
