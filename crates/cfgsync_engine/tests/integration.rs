//! Integration tests for the sync engine against the configuration server.

use async_trait::async_trait;
use cfgsync_engine::{
    standard_registry, standard_rules, ActivePath, ClientFrame, ConfigSnapshot, EnginePhase,
    FieldValue, HttpPersistence, LiveConnector, LiveLink, LoopbackClient, LoopbackServer, Notice,
    PresentationEvent, RawInput, ReconnectConfig, RecordingPresentation, SyncConfig, SyncEngine,
    SyncError, SyncResult,
};
use cfgsync_server::{AuthConfig, ConfigServer, ServerConfig, SessionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP surface of an in-memory server that can be taken down.
#[derive(Clone)]
struct ServerHttp {
    server: Arc<ConfigServer>,
    down: Arc<AtomicBool>,
}

impl LoopbackServer for ServerHttp {
    fn handle_get(&self, path: &str) -> Result<Vec<u8>, String> {
        if self.down.load(Ordering::SeqCst) {
            return Err("502 Bad Gateway".into());
        }
        self.server.handle_get(path)
    }

    fn handle_patch(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        if self.down.load(Ordering::SeqCst) {
            return Err("502 Bad Gateway".into());
        }
        self.server.handle_patch(path, body)
    }
}

/// Live surface of an in-memory server.
#[derive(Clone)]
struct ServerConnector {
    server: Arc<ConfigServer>,
    accepting: Arc<AtomicBool>,
    sessions: Arc<Mutex<Vec<SessionId>>>,
    received: Arc<Mutex<Vec<ClientFrame>>>,
}

impl ServerConnector {
    fn new(server: Arc<ConfigServer>) -> Self {
        Self {
            server,
            accepting: Arc::new(AtomicBool::new(true)),
            sessions: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Drops every live session from the server side.
    fn disconnect_all(&self) {
        for id in self.sessions.lock().drain(..) {
            self.server.close_session(id);
        }
    }

    fn auth_frames(&self) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Auth(_)))
            .count()
    }

    fn message_frames(&self) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Message(_)))
            .count()
    }
}

#[async_trait]
impl LiveConnector for ServerConnector {
    async fn connect(&self, _url: &str) -> SyncResult<LiveLink> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }

        let (link, peer) = LiveLink::pair();
        let id = self
            .server
            .open_session(peer.to_client)
            .map_err(|e| SyncError::transport_retryable(e.to_string()))?;
        self.sessions.lock().push(id);

        let server = Arc::clone(&self.server);
        let received = Arc::clone(&self.received);
        let mut from_client = peer.from_client;
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                received.lock().push(frame.clone());
                let _ = server.handle_frame(id, frame);
            }
            server.close_session(id);
        });

        Ok(link)
    }
}

type Engine = SyncEngine<
    ServerConnector,
    HttpPersistence<LoopbackClient<ServerHttp>>,
    Arc<RecordingPresentation>,
>;

struct Harness {
    server: Arc<ConfigServer>,
    http: ServerHttp,
    live: ServerConnector,
    ui: Arc<RecordingPresentation>,
    engine: Engine,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(initial: &[u8], server_config: impl FnOnce(ServerConfig) -> ServerConfig) -> Harness {
    init_tracing();

    let initial = ConfigSnapshot::decode(initial).unwrap();
    let server = Arc::new(ConfigServer::new(server_config(ServerConfig::new(initial))));
    let http = ServerHttp {
        server: Arc::clone(&server),
        down: Arc::new(AtomicBool::new(false)),
    };
    let live = ServerConnector::new(Arc::clone(&server));
    let ui = Arc::new(RecordingPresentation::new());

    let config = SyncConfig::new("http://localhost:8000")
        .with_prefix("/cloud")
        .with_request_timeout(Duration::from_secs(2))
        .with_reconnect(
            ReconnectConfig::new()
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(50)),
        );
    let registry = standard_registry();
    let rules = standard_rules(&registry).unwrap();
    let persistence = HttpPersistence::new(config.api_url(), LoopbackClient::new(http.clone()));

    let engine = SyncEngine::new(
        config,
        registry,
        rules,
        live.clone(),
        persistence,
        Arc::clone(&ui),
    )
    .unwrap();

    Harness {
        server,
        http,
        live,
        ui,
        engine,
    }
}

/// Handles transport events until `done` holds.
async fn pump_until(engine: &mut Engine, what: &str, mut done: impl FnMut(&Engine) -> bool) {
    for _ in 0..200 {
        if done(engine) {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(20), engine.process_next_event()).await;
    }
    panic!("timed out waiting for {what}");
}

async fn eventually(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

const CONFIG: &[u8] = br#"{
    "auth": false, "username": "root", "password": "toor",
    "localStorage": false, "diff": false, "buffer": false, "dirStorage": false,
    "notifications": false, "online": true, "showKeysPanel": true,
    "editor": "edward", "packer": "tar", "port": 8000, "root": "/"
}"#;

#[tokio::test]
async fn fallback_applies_only_after_successful_write() {
    let mut h = harness(CONFIG, |c| c);
    h.live.set_accepting(false);
    h.engine.initialize().await.unwrap();
    assert_eq!(h.engine.transport().active_path(), ActivePath::Fallback);

    h.engine
        .on_field_changed(RawInput::text("packer", "zip"))
        .await
        .unwrap();
    assert_eq!(h.server.snapshot().get("packer"), Some(FieldValue::from("zip")));
    assert_eq!(h.engine.store().get("packer"), Some(&FieldValue::from("zip")));
    assert_eq!(h.engine.stats().fallback_writes, 1);

    h.http.down.store(true, Ordering::SeqCst);
    h.engine
        .on_field_changed(RawInput::text("port", "9000"))
        .await
        .unwrap();

    assert_eq!(h.engine.store().get("port"), Some(&FieldValue::Number(8000.0)));
    assert_eq!(h.server.snapshot().get("port"), Some(FieldValue::Number(8000.0)));
    assert_eq!(h.ui.notices(), vec![Notice::SaveFailed]);
    assert_eq!(h.engine.stats().failed_writes, 1);
}

#[tokio::test]
async fn load_failure_then_retry() {
    let mut h = harness(CONFIG, |c| c);
    h.http.down.store(true, Ordering::SeqCst);

    let err = h.engine.initialize().await.unwrap_err();
    assert!(matches!(err, SyncError::ConfigLoadFailed(_)));
    assert_eq!(h.engine.phase(), EnginePhase::Unavailable);
    assert_eq!(h.ui.notices(), vec![Notice::LoadFailed]);
    assert_eq!(Notice::LoadFailed.to_string(), "Could not load config!");

    h.http.down.store(false, Ordering::SeqCst);
    h.engine.initialize().await.unwrap();
    assert_eq!(h.engine.phase(), EnginePhase::Ready);
    assert_eq!(h.engine.store().get("root"), Some(&FieldValue::from("/")));
}

#[tokio::test]
async fn storage_group_is_forced_off() {
    let mut h = harness(CONFIG, |c| c);
    h.live.set_accepting(false);
    h.engine.initialize().await.unwrap();

    h.engine
        .on_fields_changed(&[
            RawInput::checkbox("diff", true),
            RawInput::checkbox("buffer", true),
        ])
        .await
        .unwrap();

    assert_eq!(
        h.ui.warnings(),
        vec!["diff and buffer do not work without localStorage".to_string()]
    );
    for name in ["diff", "buffer", "dirStorage"] {
        assert!(!h.engine.store().is_enabled(name), "{name} should be off");
        assert_eq!(h.server.snapshot().get(name), Some(FieldValue::Bool(false)));
    }

    // Enabling the base together with a dependent is accepted as-is
    h.ui.take();
    h.engine
        .on_fields_changed(&[
            RawInput::checkbox("localStorage", true),
            RawInput::checkbox("dirStorage", true),
        ])
        .await
        .unwrap();
    assert!(h.ui.warnings().is_empty());
    assert!(h.engine.store().is_enabled("dirStorage"));

    // Turning the base off takes the enabled dependents with it
    h.engine
        .on_field_changed(RawInput::checkbox("localStorage", false))
        .await
        .unwrap();
    assert_eq!(
        h.ui.warnings(),
        vec!["dirStorage does not work without localStorage".to_string()]
    );
    assert_eq!(h.server.snapshot().get("dirStorage"), Some(FieldValue::Bool(false)));
}

#[tokio::test]
async fn credentials_sent_once_per_connection() {
    let config = br#"{"auth": true, "username": "root", "password": "toor", "diff": false}"#;
    let mut h = harness(config, |c| c.with_auth(AuthConfig::new("root", "toor")));
    h.engine.initialize().await.unwrap();

    pump_until(&mut h.engine, "first connection", |e| e.stats().connections == 1).await;
    let live = h.live.clone();
    eventually("auth frame", || live.auth_frames() == 1).await;

    h.live.disconnect_all();
    pump_until(&mut h.engine, "reconnect", |e| e.stats().connections == 2).await;
    eventually("second auth frame", || live.auth_frames() == 2).await;

    // Authenticated writes are accepted by the server
    h.engine
        .on_field_changed(RawInput::checkbox("diff", true))
        .await
        .unwrap();
    let server = Arc::clone(&h.server);
    eventually("live write", || {
        server.snapshot().get("diff") == Some(FieldValue::Bool(true))
    })
    .await;
    assert_eq!(h.live.auth_frames(), 2);
    assert!(h.ui.notices().is_empty());
}

#[tokio::test]
async fn rejected_credentials_fall_back_to_http() {
    let config = br#"{"auth": true, "username": "root", "password": "wrong", "diff": false}"#;
    let mut h = harness(config, |c| c.with_auth(AuthConfig::new("root", "toor")));
    h.engine.initialize().await.unwrap();

    let ui = Arc::clone(&h.ui);
    pump_until(&mut h.engine, "rejection", |_| {
        ui.notices().contains(&Notice::AuthRejected)
    })
    .await;
    assert_eq!(Notice::AuthRejected.to_string(), "Wrong credentials!");
    assert_eq!(h.engine.transport().active_path(), ActivePath::Fallback);

    h.engine
        .on_field_changed(RawInput::text("editor", "dword"))
        .await
        .unwrap();
    assert_eq!(h.server.snapshot().get("editor"), Some(FieldValue::from("dword")));
    assert_eq!(h.engine.stats().fallback_writes, 1);
    assert_eq!(h.live.message_frames(), 0);
}

#[tokio::test]
async fn remote_updates_bypass_rules() {
    let mut h = harness(CONFIG, |c| c);
    h.engine.initialize().await.unwrap();
    pump_until(&mut h.engine, "connection", |e| e.stats().connections == 1).await;
    h.ui.take();

    // Another client writes through the HTTP endpoint
    h.server
        .handle_patch("/cloud/api/v1/config", br#"{"diff":true,"theme":"dark"}"#)
        .unwrap();

    pump_until(&mut h.engine, "remote update", |e| {
        e.stats().remote_updates_applied == 1
    })
    .await;

    assert!(h.engine.store().is_enabled("diff"));
    assert!(!h.engine.store().is_enabled("localStorage"));
    assert!(h.ui.warnings().is_empty());
    assert_eq!(h.engine.store().get("theme"), None);
    assert_eq!(h.engine.stats().remote_updates_skipped, 1);
    assert!(h
        .ui
        .events()
        .contains(&PresentationEvent::Apply("diff".into(), FieldValue::Bool(true))));
}

#[tokio::test]
async fn capability_push_reports_storage() {
    let config = br#"{"localStorage": true, "diff": false}"#;
    let mut h = harness(config, |c| c);
    h.engine.initialize().await.unwrap();
    h.ui.take();

    let ui = Arc::clone(&h.ui);
    pump_until(&mut h.engine, "capability push", |_| {
        ui.events()
            .iter()
            .any(|e| matches!(e, PresentationEvent::ServerConfig(_)))
    })
    .await;
    assert!(h.ui.events().contains(&PresentationEvent::StorageAllowed(true)));
}

#[tokio::test]
async fn reconnect_switches_back_to_live() {
    let mut h = harness(CONFIG, |c| c);
    h.engine.initialize().await.unwrap();
    pump_until(&mut h.engine, "connection", |e| e.stats().connections == 1).await;

    h.engine
        .on_field_changed(RawInput::checkbox("notifications", true))
        .await
        .unwrap();
    assert_eq!(h.engine.stats().live_sends, 1);

    // Drop the link and refuse new ones for a while
    h.live.set_accepting(false);
    h.live.disconnect_all();
    pump_until(&mut h.engine, "disconnect", |e| {
        e.transport().active_path() == ActivePath::Fallback
    })
    .await;

    let revision = h.server.revision();
    h.engine
        .on_field_changed(RawInput::checkbox("online", false))
        .await
        .unwrap();
    assert_eq!(h.engine.stats().fallback_writes, 1);
    assert_eq!(h.server.revision(), revision + 1);

    h.live.set_accepting(true);
    pump_until(&mut h.engine, "reconnect", |e| e.stats().connections == 2).await;
    assert_eq!(h.engine.transport().active_path(), ActivePath::Live);

    h.engine
        .on_field_changed(RawInput::checkbox("showKeysPanel", false))
        .await
        .unwrap();
    assert_eq!(h.engine.stats().live_sends, 2);
    assert_eq!(h.engine.stats().fallback_writes, 1);

    let server = Arc::clone(&h.server);
    eventually("live write", || {
        server.snapshot().get("showKeysPanel") == Some(FieldValue::Bool(false))
    })
    .await;
}

#[tokio::test]
async fn spawned_engine_handles_commands() {
    let h = harness(CONFIG, |c| c);
    let server = Arc::clone(&h.server);
    let ui = Arc::clone(&h.ui);
    let (handle, task) = h.engine.spawn();

    // Queued before the initial load finished
    handle.show().unwrap();
    handle.field_changed(RawInput::text("root", "/srv")).unwrap();

    eventually("write through handle", || {
        server.snapshot().get("root") == Some(FieldValue::from("/srv"))
    })
    .await;
    eventually("live session", || server.session_count() == 1).await;
    assert!(!ui.events().contains(&PresentationEvent::Visible(true)));

    handle.show().unwrap();
    eventually("dialog shown", || {
        ui.events().contains(&PresentationEvent::Visible(true))
    })
    .await;

    handle.shutdown().unwrap();
    let engine = task.await.unwrap();
    assert_eq!(engine.store().get("root"), Some(&FieldValue::from("/srv")));
    assert!(handle.is_closed());
}
