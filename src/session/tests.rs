use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::backend::RemoteDesktopBackend;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult, CredentialError, SessionError};
use crate::notify::UserNotifier;
use crate::session::{SessionManager, SessionPhase};

struct MockBackend {
    requires_proxy: bool,
    fail_remove_pin: bool,
    saved_pins: Mutex<Vec<String>>,
    configured: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    removed: AtomicBool,
}

impl MockBackend {
    fn new(requires_proxy: bool) -> Arc<Self> {
        Arc::new(Self {
            requires_proxy,
            fail_remove_pin: false,
            saved_pins: Mutex::new(Vec::new()),
            configured: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    fn with_failing_remove(requires_proxy: bool) -> Arc<Self> {
        Arc::new(Self {
            requires_proxy,
            fail_remove_pin: true,
            saved_pins: Mutex::new(Vec::new()),
            configured: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    fn pins(&self) -> Vec<String> {
        self.saved_pins.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteDesktopBackend for MockBackend {
    fn name(&self) -> &'static str {
        "MockVNC"
    }

    fn requires_proxy(&self) -> bool {
        self.requires_proxy
    }

    async fn configure(&self) -> AgentResult<()> {
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn save_pin(&self, pin: &str) -> AgentResult<()> {
        self.saved_pins.lock().unwrap().push(pin.to_string());
        Ok(())
    }

    async fn remove_pin(&self) -> AgentResult<()> {
        if self.fail_remove_pin {
            return Err(CredentialError::StoreClear("injected fault".to_string()).into());
        }
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_service(&self, _port: u16) -> AgentResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_service(&self) -> AgentResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct SilentNotifier;

#[async_trait]
impl UserNotifier for SilentNotifier {
    async fn notify_pin(&self, _pin: &str) -> AgentResult<()> {
        Ok(())
    }
}

async fn manager_with(backend: Arc<MockBackend>) -> SessionManager {
    let mut config = AgentConfig::default();
    // Any free ephemeral port works as the public proxy port.
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    config.proxy.port = listener.local_addr().unwrap().port();
    drop(listener);

    SessionManager::new(Arc::new(RwLock::new(config)), Arc::new(SilentNotifier))
        .with_backend(backend)
}

#[tokio::test]
async fn start_runs_configure_before_credentials_and_start() {
    let backend = MockBackend::new(false);
    let manager = manager_with(backend.clone()).await;

    manager.start("483920", false).await.unwrap();

    assert!(backend.configured.load(Ordering::SeqCst));
    assert_eq!(backend.pins(), vec!["483920".to_string()]);

    let session = manager.active_session().await.unwrap();
    assert_eq!(session.backend_name, "MockVNC");
    assert!(!session.degraded);

    // Backend start runs as a background task.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(backend.started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn second_start_is_rejected_while_active() {
    let backend = MockBackend::new(false);
    let manager = manager_with(backend).await;

    manager.start("111111", false).await.unwrap();
    let result = manager.start("222222", false).await;

    assert!(matches!(
        result,
        Err(AgentError::Session(SessionError::AlreadyActive))
    ));
}

#[tokio::test]
async fn stop_rotates_credential_by_replacement() {
    let backend = MockBackend::new(false);
    let manager = manager_with(backend.clone()).await;

    manager.start("483920", false).await.unwrap();
    manager.stop().await.unwrap();

    let pins = backend.pins();
    assert_eq!(pins.len(), 2);
    assert_ne!(pins[1], "483920");
    assert!(backend.stopped.load(Ordering::SeqCst));
    assert!(manager.active_session().await.is_none());
}

#[tokio::test]
async fn credential_rotation_survives_remove_pin_fault() {
    let backend = MockBackend::with_failing_remove(false);
    let manager = manager_with(backend.clone()).await;

    manager.start("483920", false).await.unwrap();
    manager.stop().await.unwrap();

    // Removal failed, but a fresh random PIN still replaced the old one.
    let pins = backend.pins();
    assert_eq!(pins.len(), 2);
    assert_ne!(pins[1], "483920");
    assert!(!backend.removed.load(Ordering::SeqCst));
    assert!(backend.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn occupied_proxy_port_degrades_the_session() {
    let backend = MockBackend::new(true);

    let mut config = AgentConfig::default();
    let occupier = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    config.proxy.port = occupier.local_addr().unwrap().port();

    let manager = SessionManager::new(Arc::new(RwLock::new(config)), Arc::new(SilentNotifier))
        .with_backend(backend.clone());

    manager.start("483920", false).await.unwrap();

    let session = manager.active_session().await.unwrap();
    assert!(session.degraded);
    // Backend is still configured and credentialed despite the collision.
    assert!(backend.configured.load(Ordering::SeqCst));
    assert_eq!(backend.pins(), vec!["483920".to_string()]);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn proxy_backend_gets_port_above_public_port() {
    let backend = MockBackend::new(true);
    let manager = manager_with(backend.clone()).await;

    manager.start("483920", false).await.unwrap();

    let session = manager.active_session().await.unwrap();
    let internal = session.internal_port.unwrap();
    assert!(internal > session.proxy_port);
    assert_eq!(session.phase, SessionPhase::ProxyListening);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn stop_without_session_is_not_active() {
    let backend = MockBackend::new(false);
    let manager = manager_with(backend).await;

    assert!(matches!(
        manager.stop().await,
        Err(AgentError::Session(SessionError::NotActive))
    ));
}
