//! Sync engine state machine.

use crate::config::{ForcedUpdatePolicy, SyncConfig};
use crate::error::{ConfigError, SyncError, SyncResult};
use crate::handle::{EngineCommand, EngineHandle};
use crate::http::FallbackPersistence;
use crate::presentation::{Notice, Presentation};
use crate::registry::{FieldKind, FieldRegistry, RawInput};
use crate::rules::{DependencyRules, UiEffect};
use crate::store::FieldStore;
use crate::transport::{Delivery, LiveConnector, TransportChannel, TransportEvent, TransportEvents};
use cfgsync_protocol::{ConfigSnapshot, Credentials, FieldUpdate, FieldValue, UpdateBatch};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Created, nothing loaded yet.
    Idle,
    /// Reading the configuration.
    Loading,
    /// Configuration loaded; accepting input.
    Ready,
    /// The last load failed.
    Unavailable,
}

impl EnginePhase {
    /// Returns true if user input is accepted.
    pub fn accepts_input(&self) -> bool {
        matches!(self, EnginePhase::Ready)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Updates handed to the live channel.
    pub live_sends: u64,
    /// Updates confirmed by the fallback endpoint.
    pub fallback_writes: u64,
    /// Updates that could not be delivered.
    pub failed_writes: u64,
    /// Remote updates applied.
    pub remote_updates_applied: u64,
    /// Remote updates skipped as unknown or mistyped.
    pub remote_updates_skipped: u64,
    /// Rule warnings shown.
    pub warnings_raised: u64,
    /// Live connections observed.
    pub connections: u64,
    /// Credential rejections.
    pub auth_rejections: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Reconciles user input, dependency rules and the transport.
///
/// All logic runs on the caller's task. Transport events arrive on a
/// queue and are handled one at a time, either by the caller through
/// [`SyncEngine::process_next_event`] or by [`SyncEngine::run`].
pub struct SyncEngine<C: LiveConnector, F: FallbackPersistence, P: Presentation> {
    config: SyncConfig,
    registry: FieldRegistry,
    rules: DependencyRules,
    store: FieldStore,
    transport: TransportChannel<C, F>,
    events: TransportEvents,
    presentation: P,
    phase: EnginePhase,
    visible: bool,
    authenticated: Option<u64>,
    stats: EngineStats,
}

impl<C: LiveConnector, F: FallbackPersistence, P: Presentation> SyncEngine<C, F, P> {
    /// Creates a new sync engine.
    ///
    /// Fails if a configured auth or storage field is declared with the wrong kind.
    pub fn new(
        config: SyncConfig,
        registry: FieldRegistry,
        rules: DependencyRules,
        connector: C,
        fallback: F,
        presentation: P,
    ) -> SyncResult<Self> {
        check_kind(&registry, &config.auth_field, &config.auth_field, true)?;
        check_kind(&registry, &config.auth_field, &config.username_field, false)?;
        check_kind(&registry, &config.auth_field, &config.password_field, false)?;
        check_kind(&registry, &config.storage_field, &config.storage_field, true)?;

        let (transport, events) = TransportChannel::new(connector, fallback, &config);
        Ok(Self {
            config,
            registry,
            rules,
            store: FieldStore::new(),
            transport,
            events,
            presentation,
            phase: EnginePhase::Idle,
            visible: false,
            authenticated: None,
            stats: EngineStats::default(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Current stats.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The local configuration mirror.
    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    /// The transport.
    pub fn transport(&self) -> &TransportChannel<C, F> {
        &self.transport
    }

    /// The presentation.
    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns true if the dialog is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Loads the configuration and opens the live channel.
    ///
    /// On failure the engine is left `Unavailable` and may be initialized again.
    /// With the dialog disabled this does nothing and the engine stays `Idle`.
    pub async fn initialize(&mut self) -> SyncResult<()> {
        if !self.config.dialog_enabled {
            debug!("config dialog disabled, skipping load");
            return Ok(());
        }

        self.phase = EnginePhase::Loading;
        self.presentation.on_loading_changed(true);

        let result = self.transport.read_snapshot().await;
        self.presentation.on_loading_changed(false);

        match result {
            Ok(snapshot) => {
                self.load(&snapshot);
                self.phase = EnginePhase::Ready;
                info!(fields = self.store.len(), "configuration loaded");
                self.transport.connect();
                Ok(())
            }
            Err(err) => {
                self.phase = EnginePhase::Unavailable;
                Err(self.load_failed(err))
            }
        }
    }

    /// Shows the dialog, refreshing the configuration first.
    ///
    /// Ignored unless the engine is ready.
    pub async fn show(&mut self) -> SyncResult<()> {
        if !self.phase.accepts_input() {
            debug!(phase = ?self.phase, "ignoring show");
            return Ok(());
        }

        let snapshot = match self.transport.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.load_failed(err)),
        };
        self.load(&snapshot);
        self.visible = true;
        self.presentation.on_visibility_changed(true);
        Ok(())
    }

    /// Hides the dialog. Ignored unless the engine is ready.
    pub fn hide(&mut self) {
        if !self.phase.accepts_input() {
            debug!(phase = ?self.phase, "ignoring hide");
            return;
        }
        self.visible = false;
        self.presentation.on_visibility_changed(false);
    }

    /// Handles one control change.
    pub async fn on_field_changed(&mut self, input: RawInput) -> SyncResult<()> {
        self.on_fields_changed(std::slice::from_ref(&input)).await
    }

    /// Handles several control changes as one batch.
    ///
    /// Invalid input rejects the whole batch. Delivery failures are
    /// reported through the presentation and do not fail the call.
    pub async fn on_fields_changed(&mut self, inputs: &[RawInput]) -> SyncResult<()> {
        if !self.phase.accepts_input() {
            return Err(SyncError::NotReady);
        }

        let batch = inputs
            .iter()
            .map(|input| self.registry.normalize(input))
            .collect::<SyncResult<UpdateBatch>>()?;

        let evaluation = self.rules.evaluate(&self.store, &batch);

        for message in &evaluation.warnings {
            self.stats.warnings_raised += 1;
            warn!(%message, "dependency warning");
            self.presentation.on_warn(message);
        }
        for effect in &evaluation.effects {
            self.apply_effect(effect);
        }

        for update in &evaluation.originals {
            self.deliver(update).await;
        }
        for update in &evaluation.forced {
            match self.config.forced_updates {
                ForcedUpdatePolicy::Propagate => self.deliver(update).await,
                ForcedUpdatePolicy::LocalOnly => self.reflect(update),
            }
        }

        Ok(())
    }

    /// Handles one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { connection, .. } => {
                if !self.transport.observe(&event) {
                    debug!(connection, "ignoring stale connect");
                    return;
                }
                self.stats.connections += 1;
                info!(connection, "switched to live channel");
                self.authenticate(connection);
            }
            TransportEvent::Disconnected { connection } => {
                if self.transport.observe(&event) {
                    info!(connection, "switched to fallback");
                }
            }
            TransportEvent::AuthRejected { connection } => {
                if !self.transport.observe(&event) {
                    return;
                }
                self.stats.auth_rejections += 1;
                warn!(connection, "credentials rejected");
                self.presentation.on_notice(&Notice::AuthRejected);
            }
            TransportEvent::RemoteUpdate(batch) => self.apply_remote(&batch),
            TransportEvent::ServerPush(snapshot) => {
                self.presentation.on_server_config(&snapshot);
                if let Some(FieldValue::Bool(allowed)) = snapshot.get(&self.config.storage_field) {
                    self.presentation.on_storage_allowed(allowed);
                }
            }
            TransportEvent::Log(entry) => {
                debug!(%entry, "server log");
                self.presentation.on_log(&entry);
            }
            TransportEvent::ServerError(message) => {
                warn!(%message, "server error");
                self.presentation.on_notice(&Notice::Server(message));
            }
            TransportEvent::TransportError(message) => {
                debug!(%message, "live channel attempt failed");
                self.stats.last_error = Some(message);
            }
        }
    }

    /// Waits for the next transport event and handles it.
    ///
    /// Returns false if the event queue is closed.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_transport_event(event);
                true
            }
            None => false,
        }
    }

    /// Handles every event already queued. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_transport_event(event);
            handled += 1;
        }
        handled
    }

    /// Dispatch loop: commands and transport events, one at a time.
    ///
    /// Returns the engine once a `Shutdown` command arrives or every
    /// handle is dropped.
    pub async fn run(self, commands: mpsc::UnboundedReceiver<EngineCommand>) -> Self {
        self.serve(VecDeque::new(), commands).await
    }

    async fn serve(
        mut self,
        mut backlog: VecDeque<EngineCommand>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Self {
        loop {
            let command = match backlog.pop_front() {
                Some(command) => command,
                None => tokio::select! {
                    command = commands.recv() => match command {
                        Some(command) => command,
                        None => break,
                    },
                    Some(event) = self.events.recv() => {
                        self.handle_transport_event(event);
                        continue;
                    }
                },
            };

            match command {
                EngineCommand::FieldsChanged(inputs) => {
                    if let Err(err) = self.on_fields_changed(&inputs).await {
                        warn!(error = %err, "input rejected");
                    }
                }
                EngineCommand::Initialize => {
                    let _ = self.initialize().await;
                    backlog.extend(drop_queued_visibility(&mut commands));
                }
                EngineCommand::Show => {
                    let _ = self.show().await;
                }
                EngineCommand::Hide => self.hide(),
                EngineCommand::Shutdown => break,
            }
        }

        self.shutdown();
        self
    }

    /// Closes the live channel.
    pub fn shutdown(&mut self) {
        self.transport.close();
        self.authenticated = None;
    }

    fn load(&mut self, snapshot: &ConfigSnapshot) {
        for update in self.store.seed(snapshot, &self.registry) {
            self.presentation.on_apply(&update.name, &update.value);
        }
        for effect in self.rules.gate_effects(&self.store) {
            self.apply_effect(&effect);
        }
        if let Some(FieldValue::Bool(allowed)) = self.store.get(&self.config.storage_field) {
            self.presentation.on_storage_allowed(*allowed);
        }
    }

    fn load_failed(&mut self, err: SyncError) -> SyncError {
        warn!(error = %err, "could not load config");
        self.stats.last_error = Some(err.to_string());
        self.presentation.on_notice(&Notice::LoadFailed);
        match err {
            SyncError::ConfigLoadFailed(_) => err,
            other => SyncError::ConfigLoadFailed(other.to_string()),
        }
    }

    /// Sends one update and reflects it once the transport accepted it.
    ///
    /// A live push is accepted as soon as it is queued; a fallback write
    /// only once the server confirmed it.
    async fn deliver(&mut self, update: &FieldUpdate) {
        match self.transport.send(update).await {
            Ok(Delivery::Live) => {
                self.stats.live_sends += 1;
                self.reflect(update);
            }
            Ok(Delivery::Persisted) => {
                self.stats.fallback_writes += 1;
                self.reflect(update);
            }
            Err(err) => {
                self.stats.failed_writes += 1;
                warn!(field = %update.name, error = %err, "could not save config");
                self.stats.last_error = Some(err.to_string());
                self.presentation.on_notice(&Notice::SaveFailed);
            }
        }
    }

    fn reflect(&mut self, update: &FieldUpdate) {
        self.store.apply(update);
        self.presentation.on_apply(&update.name, &update.value);
        if update.name == self.config.storage_field {
            if let FieldValue::Bool(allowed) = update.value {
                self.presentation.on_storage_allowed(allowed);
            }
        }
    }

    fn apply_remote(&mut self, batch: &UpdateBatch) {
        for update in batch {
            if let Err(err) = self.registry.check(update) {
                self.stats.remote_updates_skipped += 1;
                warn!(field = %update.name, error = %err, "skipping remote update");
                continue;
            }
            self.stats.remote_updates_applied += 1;
            self.reflect(update);
        }
    }

    fn apply_effect(&self, effect: &UiEffect) {
        match effect {
            UiEffect::SetEnabled { name, enabled } => {
                self.presentation.on_field_enabled(name, *enabled);
            }
        }
    }

    fn authenticate(&mut self, connection: u64) {
        if !self.store.is_enabled(&self.config.auth_field) {
            return;
        }
        if self.authenticated == Some(connection) {
            return;
        }

        let credentials = Credentials::new(
            self.store.text(&self.config.username_field),
            self.store.text(&self.config.password_field),
        );
        match self.transport.send_auth(credentials) {
            Ok(()) => {
                debug!(connection, "credentials sent");
                self.authenticated = Some(connection);
            }
            Err(err) => warn!(connection, error = %err, "could not send credentials"),
        }
    }
}

impl<C, F, P> SyncEngine<C, F, P>
where
    C: LiveConnector,
    F: FallbackPersistence + 'static,
    P: Presentation + 'static,
{
    /// Spawns the engine: initializes it, then runs the dispatch loop.
    ///
    /// Show and hide requests queued while a load is in flight are dropped.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<Self>) {
        let (handle, commands) = EngineHandle::channel();
        let backlog = VecDeque::from([EngineCommand::Initialize]);
        let task = tokio::spawn(self.serve(backlog, commands));
        (handle, task)
    }
}

/// Takes every command queued during a load, dropping show and hide.
fn drop_queued_visibility(
    commands: &mut mpsc::UnboundedReceiver<EngineCommand>,
) -> Vec<EngineCommand> {
    let mut kept = Vec::new();
    while let Ok(command) = commands.try_recv() {
        match command {
            EngineCommand::Show | EngineCommand::Hide => {
                debug!(?command, "ignoring request queued while loading");
            }
            other => kept.push(other),
        }
    }
    kept
}

fn check_kind(
    registry: &FieldRegistry,
    rule: &str,
    name: &str,
    toggle: bool,
) -> Result<(), ConfigError> {
    let Some(kind) = registry.kind(name) else {
        return Ok(());
    };
    match (toggle, kind) {
        (true, FieldKind::Bool) | (false, FieldKind::Text) => Ok(()),
        (true, kind) => Err(ConfigError::NotAToggle {
            rule: rule.to_string(),
            name: name.to_string(),
            kind: kind.name().to_string(),
        }),
        (false, kind) => Err(ConfigError::TypeMismatch {
            name: name.to_string(),
            expected: FieldKind::Text.name().to_string(),
            found: kind.name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::defaults::{standard_registry, standard_rules};
    use crate::http::MemoryPersistence;
    use crate::presentation::{PresentationEvent, RecordingPresentation};
    use crate::transport::{ActivePath, MockConnector, MockConnectorHandle};
    use cfgsync_protocol::{ClientFrame, ServerFrame};
    use std::sync::Arc;

    type TestEngine =
        SyncEngine<MockConnector, Arc<MemoryPersistence>, Arc<RecordingPresentation>>;

    struct Fixture {
        engine: TestEngine,
        connector: MockConnectorHandle,
        persistence: Arc<MemoryPersistence>,
        ui: Arc<RecordingPresentation>,
    }

    fn fixture_with(snapshot: &[u8], config: SyncConfig) -> Fixture {
        let registry = standard_registry();
        let rules = standard_rules(&registry).unwrap();
        let (connector, handle) = MockConnector::new();
        let persistence = Arc::new(MemoryPersistence::new(
            ConfigSnapshot::decode(snapshot).unwrap(),
        ));
        let ui = Arc::new(RecordingPresentation::new());
        let engine = SyncEngine::new(
            config,
            registry,
            rules,
            connector,
            Arc::clone(&persistence),
            Arc::clone(&ui),
        )
        .unwrap();
        Fixture {
            engine,
            connector: handle,
            persistence,
            ui,
        }
    }

    fn fixture(snapshot: &[u8]) -> Fixture {
        let config = SyncConfig::new("http://localhost:8000")
            .with_reconnect(ReconnectConfig::new().with_jitter(false));
        fixture_with(snapshot, config)
    }

    const SNAPSHOT: &[u8] = br#"{
        "auth": false, "username": "root", "password": "toor",
        "localStorage": false, "diff": false, "buffer": false, "dirStorage": false,
        "editor": "edward", "port": 8000
    }"#;

    #[tokio::test]
    async fn initialize_seeds_store_and_presentation() {
        let mut f = fixture(SNAPSHOT);
        assert_eq!(f.engine.phase(), EnginePhase::Idle);

        f.engine.initialize().await.unwrap();

        assert_eq!(f.engine.phase(), EnginePhase::Ready);
        assert_eq!(f.engine.store().get("editor"), Some(&FieldValue::from("edward")));
        assert_eq!(f.engine.store().len(), 9);

        let events = f.ui.events();
        assert_eq!(events.first(), Some(&PresentationEvent::Loading(true)));
        assert!(events.contains(&PresentationEvent::Loading(false)));
        assert!(events.contains(&PresentationEvent::FieldEnabled("username".into(), false)));
        assert!(events.contains(&PresentationEvent::StorageAllowed(false)));
        assert_eq!(f.ui.applied().len(), 9);
    }

    #[tokio::test]
    async fn load_failure_leaves_engine_retryable() {
        let mut f = fixture(SNAPSHOT);
        f.persistence.set_fail_reads(true);

        let err = f.engine.initialize().await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigLoadFailed(_)));
        assert_eq!(f.engine.phase(), EnginePhase::Unavailable);
        assert_eq!(f.ui.notices(), vec![Notice::LoadFailed]);

        // Input and show are not accepted while unavailable
        assert!(matches!(
            f.engine.on_field_changed(RawInput::checkbox("diff", true)).await,
            Err(SyncError::NotReady)
        ));
        f.engine.show().await.unwrap();
        assert!(!f.engine.is_visible());

        f.persistence.set_fail_reads(false);
        f.engine.initialize().await.unwrap();
        assert_eq!(f.engine.phase(), EnginePhase::Ready);
    }

    #[tokio::test]
    async fn show_refreshes_configuration() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();

        f.persistence
            .write(&UpdateBatch::single(FieldUpdate::new("editor", "dword")))
            .await
            .unwrap();
        f.engine.show().await.unwrap();

        assert!(f.engine.is_visible());
        assert_eq!(f.engine.store().get("editor"), Some(&FieldValue::from("dword")));
        assert!(f.ui.events().contains(&PresentationEvent::Visible(true)));

        f.engine.hide();
        assert!(!f.engine.is_visible());
    }

    #[tokio::test]
    async fn fallback_write_applies_after_success() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        f.ui.take();

        f.engine
            .on_field_changed(RawInput::text("editor", "deepword"))
            .await
            .unwrap();

        assert_eq!(f.engine.store().get("editor"), Some(&FieldValue::from("deepword")));
        assert_eq!(f.persistence.writes().len(), 1);
        assert_eq!(f.engine.stats().fallback_writes, 1);
        assert_eq!(
            f.ui.applied(),
            vec![("editor".to_string(), FieldValue::from("deepword"))]
        );
    }

    #[tokio::test]
    async fn fallback_failure_leaves_store_unchanged() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        f.ui.take();
        f.persistence.set_fail_writes(true);

        f.engine
            .on_field_changed(RawInput::text("port", "9000"))
            .await
            .unwrap();

        assert_eq!(f.engine.store().get("port"), Some(&FieldValue::Number(8000.0)));
        assert_eq!(f.ui.notices(), vec![Notice::SaveFailed]);
        assert!(f.ui.applied().is_empty());
        assert_eq!(f.engine.stats().failed_writes, 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();

        let err = f
            .engine
            .on_field_changed(RawInput::text("port", "eighty"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput { .. }));
        assert!(f.persistence.writes().is_empty());
    }

    #[tokio::test]
    async fn group_rule_forces_dependents_off() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();

        f.engine
            .on_field_changed(RawInput::checkbox("diff", true))
            .await
            .unwrap();

        assert_eq!(
            f.ui.warnings(),
            vec!["diff does not work without localStorage".to_string()]
        );
        assert!(!f.engine.store().is_enabled("diff"));
        let writes: Vec<_> = f
            .persistence
            .writes()
            .into_iter()
            .flat_map(|b| b.into_iter())
            .collect();
        assert_eq!(
            writes,
            vec![FieldUpdate::new("diff", true), FieldUpdate::new("diff", false)]
        );
        assert_eq!(f.engine.stats().warnings_raised, 1);
    }

    #[tokio::test]
    async fn local_only_forced_updates_are_not_sent() {
        let config = SyncConfig::new("http://localhost:8000")
            .with_forced_updates(ForcedUpdatePolicy::LocalOnly);
        let mut f = fixture_with(
            br#"{"localStorage": true, "diff": true, "buffer": true}"#,
            config,
        );
        f.engine.initialize().await.unwrap();

        f.engine
            .on_field_changed(RawInput::checkbox("localStorage", false))
            .await
            .unwrap();

        assert_eq!(f.persistence.writes().len(), 1);
        assert!(!f.engine.store().is_enabled("diff"));
        assert!(!f.engine.store().is_enabled("buffer"));
        assert!(f.ui.events().contains(&PresentationEvent::StorageAllowed(false)));
    }

    #[tokio::test]
    async fn gate_toggles_credential_inputs() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        f.ui.take();

        f.engine
            .on_field_changed(RawInput::checkbox("auth", true))
            .await
            .unwrap();

        let events = f.ui.events();
        assert!(events.contains(&PresentationEvent::FieldEnabled("username".into(), true)));
        assert!(events.contains(&PresentationEvent::FieldEnabled("password".into(), true)));
        assert_eq!(f.persistence.writes().len(), 1);
    }

    #[tokio::test]
    async fn live_channel_authenticates_once_and_sends_live() {
        let mut f = fixture(
            br#"{"auth": true, "username": "root", "password": "toor", "diff": false}"#,
        );
        f.engine.initialize().await.unwrap();

        let mut peer = f.connector.accept();
        assert!(f.engine.process_next_event().await);
        assert_eq!(f.engine.transport().active_path(), ActivePath::Live);

        match peer.recv().await {
            Some(ClientFrame::Auth(credentials)) => {
                assert_eq!(credentials, Credentials::new("root", "toor"));
            }
            other => panic!("expected auth, got {other:?}"),
        }

        f.engine
            .on_field_changed(RawInput::text("editor", "dword"))
            .await
            .unwrap();
        assert!(matches!(peer.recv().await, Some(ClientFrame::Message(_))));
        assert_eq!(f.engine.stats().live_sends, 1);
        assert!(f.persistence.writes().is_empty());
        assert_eq!(f.engine.store().get("editor"), Some(&FieldValue::from("dword")));

        // A duplicate connect for the same connection does not re-send credentials
        f.engine.authenticate(1);
        assert!(peer.from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejection_notifies_and_demotes_to_fallback() {
        let mut f = fixture(br#"{"auth": true, "username": "root", "password": "bad"}"#);
        f.engine.initialize().await.unwrap();

        let peer = f.connector.accept();
        f.engine.process_next_event().await;
        peer.send(ServerFrame::Reject);
        f.engine.process_next_event().await;

        assert_eq!(f.ui.notices(), vec![Notice::AuthRejected]);
        assert_eq!(f.engine.stats().auth_rejections, 1);
        assert_eq!(f.engine.transport().active_path(), ActivePath::Fallback);

        f.engine
            .on_field_changed(RawInput::checkbox("diff", false))
            .await
            .unwrap();
        assert_eq!(f.persistence.writes().len(), 1);
    }

    #[tokio::test]
    async fn remote_updates_bypass_rules() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        f.ui.take();

        let batch: UpdateBatch = vec![
            FieldUpdate::new("diff", true),
            FieldUpdate::new("colour", "red"),
            FieldUpdate::new("port", "eighty"),
        ]
        .into_iter()
        .collect();
        f.engine
            .handle_transport_event(TransportEvent::RemoteUpdate(batch));

        assert!(f.engine.store().is_enabled("diff"));
        assert!(!f.engine.store().is_enabled("localStorage"));
        assert!(f.ui.warnings().is_empty());
        assert_eq!(f.engine.store().get("colour"), None);
        assert_eq!(f.engine.store().get("port"), Some(&FieldValue::Number(8000.0)));
        assert_eq!(f.engine.stats().remote_updates_applied, 1);
        assert_eq!(f.engine.stats().remote_updates_skipped, 2);
        assert!(f.persistence.writes().is_empty());
    }

    #[tokio::test]
    async fn server_push_reports_storage_permission() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        f.ui.take();

        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert("localStorage", FieldValue::Bool(true));
        f.engine
            .handle_transport_event(TransportEvent::ServerPush(snapshot.clone()));
        f.engine
            .handle_transport_event(TransportEvent::Log("config: diff=true".into()));
        f.engine
            .handle_transport_event(TransportEvent::ServerError("EACCES".into()));

        assert_eq!(
            f.ui.take(),
            vec![
                PresentationEvent::ServerConfig(snapshot),
                PresentationEvent::StorageAllowed(true),
                PresentationEvent::Log("config: diff=true".into()),
                PresentationEvent::Notice(Notice::Server("EACCES".into())),
            ]
        );
    }

    #[test]
    fn mistyped_auth_field_is_a_config_error() {
        let registry = FieldRegistry::builder().text("auth").build();
        let (connector, _handle) = MockConnector::new();
        let result = SyncEngine::new(
            SyncConfig::default(),
            registry,
            DependencyRules::default(),
            connector,
            MemoryPersistence::default(),
            RecordingPresentation::new(),
        );
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::NotAToggle { .. }))
        ));
    }

    #[tokio::test]
    async fn dead_live_link_and_failed_fallback_reflect_nothing() {
        let mut f = fixture(SNAPSHOT);
        f.engine.initialize().await.unwrap();
        let peer = f.connector.accept();
        f.engine.process_next_event().await;
        assert_eq!(f.engine.transport().active_path(), ActivePath::Live);
        f.ui.take();

        drop(peer);
        f.persistence.set_fail_writes(true);
        f.engine
            .on_field_changed(RawInput::checkbox("notifications", true))
            .await
            .unwrap();

        assert!(f.ui.applied().is_empty());
        assert_eq!(f.ui.notices(), vec![Notice::SaveFailed]);
        assert_eq!(f.engine.store().get("notifications"), None);
        assert_eq!(f.engine.stats().live_sends, 0);
        assert_eq!(f.engine.stats().failed_writes, 1);
    }

    #[tokio::test]
    async fn spawned_engine_drops_visibility_requests_queued_while_loading() {
        let f = fixture(SNAPSHOT);
        let ui = Arc::clone(&f.ui);
        let (handle, task) = f.engine.spawn();

        handle.show().unwrap();
        handle.hide().unwrap();
        handle.field_changed(RawInput::text("editor", "dword")).unwrap();
        handle.shutdown().unwrap();

        let engine = task.await.unwrap();
        assert_eq!(engine.phase(), EnginePhase::Ready);
        assert!(!engine.is_visible());
        assert!(!ui
            .events()
            .iter()
            .any(|e| matches!(e, PresentationEvent::Visible(_))));
        assert_eq!(engine.store().get("editor"), Some(&FieldValue::from("dword")));
        assert_eq!(f.persistence.writes().len(), 1);
    }

    #[tokio::test]
    async fn disabled_dialog_skips_loading() {
        let config = SyncConfig::new("http://localhost:8000").with_dialog(false);
        let mut f = fixture_with(SNAPSHOT, config);

        f.engine.initialize().await.unwrap();

        assert_eq!(f.engine.phase(), EnginePhase::Idle);
        assert!(f.ui.events().is_empty());
        assert_eq!(f.connector.attempts(), 0);
        assert!(matches!(
            f.engine.on_field_changed(RawInput::checkbox("diff", true)).await,
            Err(SyncError::NotReady)
        ));
    }
}
