use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{self, BackendContext, RemoteDesktopBackend, SystemProbe};
use crate::config::AgentConfig;
use crate::credential;
use crate::error::{AgentResult, SessionError};
use crate::net::{allocate_backend_port, port_in_use, ProxyServer};
use crate::notify::UserNotifier;
use crate::store::AgentStore;

use super::types::{Session, SessionPhase};

/// Owns the one active remote assistance session per agent instance and
/// drives its whole lifecycle: backend selection, credential issuance,
/// process start, network bridge, teardown.
pub struct SessionManager {
    config: Arc<RwLock<AgentConfig>>,
    notifier: Arc<dyn UserNotifier>,
    store: Option<AgentStore>,
    active: Arc<RwLock<Option<ActiveSession>>>,
    backend_override: Option<Arc<dyn RemoteDesktopBackend>>,
}

struct ActiveSession {
    session: Session,
    backend: Option<Arc<dyn RemoteDesktopBackend>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(config: Arc<RwLock<AgentConfig>>, notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            config,
            notifier,
            store: None,
            active: Arc::new(RwLock::new(None)),
            backend_override: None,
        }
    }

    pub fn with_store(mut self, store: AgentStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Pin the backend instead of discovering one. Used by tests and by
    /// deployments that disable discovery.
    pub fn with_backend(mut self, backend: Arc<dyn RemoteDesktopBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Establish a session: notify, discover, configure, store the PIN,
    /// start the backend, bridge the network. Steps run strictly in that
    /// order; each is a precondition for the next. Failures abort the
    /// remaining steps and clear the slot.
    pub async fn start(&self, pin: &str, notify_user: bool) -> AgentResult<()> {
        let cancel = CancellationToken::new();
        let (session_id, proxy_port) = {
            let config = self.config.read().await;
            let mut active = self.active.write().await;
            if active.is_some() {
                return Err(SessionError::AlreadyActive.into());
            }

            let session = Session {
                id: Uuid::new_v4(),
                backend_name: String::new(),
                notify_user,
                proxy_port: config.proxy.port,
                internal_port: None,
                created_at: Utc::now(),
                phase: SessionPhase::Configuring,
                degraded: false,
            };
            let id = session.id;
            *active = Some(ActiveSession {
                session,
                backend: None,
                cancel: cancel.clone(),
                tasks: Vec::new(),
            });
            (id, config.proxy.port)
        };

        match self
            .establish(session_id, pin, notify_user, proxy_port, &cancel)
            .await
        {
            Ok(()) => {
                self.log_event(&session_id, "session_started", None).await;
                Ok(())
            }
            Err(e) => {
                error!("session establishment failed: {}", e);
                self.log_event(&session_id, "session_start_failed", Some(&e.to_string()))
                    .await;
                self.clear_if_current(session_id).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        session_id: Uuid,
        pin: &str,
        notify_user: bool,
        proxy_port: u16,
        cancel: &CancellationToken,
    ) -> AgentResult<()> {
        // 1. Out-of-band PIN notification, fire-and-forget: a notification
        //    failure never aborts the session.
        if notify_user {
            let notifier = self.notifier.clone();
            let pin = pin.to_string();
            let token = cancel.clone();
            self.track_task(
                session_id,
                tokio::spawn(async move {
                    tokio::select! {
                        result = notifier.notify_pin(&pin) => {
                            if let Err(e) = result {
                                warn!("local user notification failed: {}", e);
                            }
                        }
                        _ = token.cancelled() => {}
                    }
                }),
            )
            .await;
        }

        // 2. Backend resolution. No side effects yet.
        let backend = match &self.backend_override {
            Some(backend) => backend.clone(),
            None => {
                let timeout = self.config.read().await.command_timeout_secs;
                backend::discover(&SystemProbe, &BackendContext::new(timeout))?
            }
        };
        self.update_session(session_id, |session| {
            session.backend_name = backend.name().to_string();
        })
        .await;
        {
            let mut active = self.active.write().await;
            if let Some(active) = active.as_mut() {
                if active.session.id == session_id {
                    active.backend = Some(backend.clone());
                }
            }
        }
        self.checkpoint(cancel)?;

        // 3. Vendor configuration. Aborts before any credential or process
        //    change is made.
        backend.configure().await?;
        self.checkpoint(cancel)?;

        // 4. Credential issuance. Aborts before backend start.
        backend.save_pin(pin).await?;
        self.update_session(session_id, |session| {
            session.phase = SessionPhase::CredentialSet;
        })
        .await;
        self.checkpoint(cancel)?;

        // 5. Listening port: fixed by the vendor, or allocated above the
        //    public proxy port for raw VNC backends.
        let internal_port = match backend.fixed_port() {
            Some(port) => port,
            None if backend.requires_proxy() => allocate_backend_port(proxy_port).await?,
            None => 0,
        };
        self.update_session(session_id, |session| {
            session.internal_port = Some(internal_port);
            session.phase = SessionPhase::BackendStarting;
        })
        .await;

        // 6. Backend start as a supervised background task. A start failure
        //    is logged; steps 3-4 are deliberately not rolled back.
        {
            let backend = backend.clone();
            let token = cancel.clone();
            self.track_task(
                session_id,
                tokio::spawn(async move {
                    tokio::select! {
                        result = backend.start_service(internal_port) => {
                            if let Err(e) = result {
                                error!("backend start failed: {}", e);
                            }
                        }
                        _ = token.cancelled() => {}
                    }
                }),
            )
            .await;
        }

        // 7. Network bridge, only for backends that need one. An occupied
        //    public port degrades the session instead of failing it.
        if backend.requires_proxy() {
            if port_in_use(proxy_port).await {
                warn!(
                    "proxy port {} occupied; session continues degraded, without remote viewing",
                    proxy_port
                );
                self.update_session(session_id, |session| {
                    session.degraded = true;
                })
                .await;
                self.log_event(&session_id, "session_degraded", Some("proxy port occupied"))
                    .await;
            } else {
                let (cert_path, key_path) = {
                    let config = self.config.read().await;
                    (config.proxy.cert_path.clone(), config.proxy.key_path.clone())
                };
                let proxy = ProxyServer::new(proxy_port, internal_port, &cert_path, &key_path);
                let token = cancel.clone();
                self.track_task(
                    session_id,
                    tokio::spawn(async move {
                        if let Err(e) = proxy.serve(token).await {
                            error!("proxy terminated: {}", e);
                        }
                    }),
                )
                .await;
                self.update_session(session_id, |session| {
                    session.phase = SessionPhase::ProxyListening;
                })
                .await;
            }
        }

        info!(
            "remote assistance session {} established on backend {}",
            session_id,
            backend.name()
        );
        Ok(())
    }

    /// Tear the active session down. Every step runs regardless of the
    /// previous step's outcome; failures are logged, never raised. The
    /// credential is always rotated to a fresh random PIN, so no stale
    /// usable credential survives a stop even when explicit removal fails.
    pub async fn stop(&self) -> AgentResult<()> {
        let Some(mut active) = self.active.write().await.take() else {
            debug!("stop requested with no active session");
            return Err(SessionError::NotActive.into());
        };

        let session_id = active.session.id;
        active.session.phase = SessionPhase::Stopping;
        info!("stopping remote assistance session {}", session_id);

        // 1. Close the proxy listener and interrupt any in-flight
        //    establishment step.
        active.cancel.cancel();

        if let Some(backend) = &active.backend {
            // 2. Revocation by replacement.
            let replacement = credential::generate_replacement_pin();
            if let Err(e) = backend.remove_pin().await {
                warn!("credential removal failed, replacement still applies: {}", e);
            }
            if let Err(e) = backend.save_pin(&replacement).await {
                error!("credential replacement failed: {}", e);
            }

            // 3. Service stop, with backend-specific force kill inside.
            if let Err(e) = backend.stop_service().await {
                warn!("backend stop failed: {}", e);
            }
        } else {
            debug!("session {} had no backend resolved yet", session_id);
        }

        // 4. Reap supervised tasks; the token already asked them to exit.
        for task in active.tasks.drain(..) {
            task.abort();
        }

        self.log_event(&session_id, "session_stopped", None).await;
        Ok(())
    }

    /// Best-effort teardown for agent shutdown.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) => {}
            Err(crate::error::AgentError::Session(SessionError::NotActive)) => {}
            Err(e) => warn!("session teardown during shutdown failed: {}", e),
        }
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> AgentResult<()> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }
        Ok(())
    }

    async fn update_session(&self, session_id: Uuid, update: impl FnOnce(&mut Session)) {
        let mut active = self.active.write().await;
        if let Some(active) = active.as_mut() {
            if active.session.id == session_id {
                update(&mut active.session);
            }
        }
    }

    async fn track_task(&self, session_id: Uuid, task: JoinHandle<()>) {
        let mut active = self.active.write().await;
        match active.as_mut() {
            Some(active) if active.session.id == session_id => active.tasks.push(task),
            // The session went away while the task was being spawned; the
            // cancellation token has already fired.
            _ => task.abort(),
        }
    }

    async fn clear_if_current(&self, session_id: Uuid) {
        let mut active = self.active.write().await;
        if active.as_ref().map(|a| a.session.id) == Some(session_id) {
            *active = None;
        }
    }

    async fn log_event(&self, session_id: &Uuid, event_type: &str, data: Option<&str>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.log_session_event(session_id, event_type, data).await {
                debug!("session event log failed: {}", e);
            }
        }
    }
}
