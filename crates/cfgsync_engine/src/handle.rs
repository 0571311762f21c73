//! Command handle for a running engine.

use crate::error::{SyncError, SyncResult};
use crate::registry::RawInput;
use tokio::sync::mpsc;

/// A request queued for the engine's dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Control changes, handled as one batch.
    FieldsChanged(Vec<RawInput>),
    /// Load the configuration again after a failed load.
    Initialize,
    /// Show the dialog.
    Show,
    /// Hide the dialog.
    Hide,
    /// Close the live channel and stop the loop.
    Shutdown,
}

/// Cloneable sender of [`EngineCommand`]s.
///
/// Sending never blocks; commands are handled in order by the engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Creates a handle and the queue the engine reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues one control change.
    pub fn field_changed(&self, input: RawInput) -> SyncResult<()> {
        self.send(EngineCommand::FieldsChanged(vec![input]))
    }

    /// Queues several control changes as one batch.
    pub fn fields_changed(&self, inputs: Vec<RawInput>) -> SyncResult<()> {
        self.send(EngineCommand::FieldsChanged(inputs))
    }

    /// Queues a reload.
    pub fn initialize(&self) -> SyncResult<()> {
        self.send(EngineCommand::Initialize)
    }

    /// Queues a show request.
    pub fn show(&self) -> SyncResult<()> {
        self.send(EngineCommand::Show)
    }

    /// Queues a hide request.
    pub fn hide(&self) -> SyncResult<()> {
        self.send(EngineCommand::Hide)
    }

    /// Asks the engine to stop.
    pub fn shutdown(&self) -> SyncResult<()> {
        self.send(EngineCommand::Shutdown)
    }

    /// Returns true if the engine is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: EngineCommand) -> SyncResult<()> {
        self.tx.send(command).map_err(|_| SyncError::Closed)
    }
}
