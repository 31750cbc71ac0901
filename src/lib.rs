//! Remote Assistance Agent
//!
//! Managed-endpoint agent exposing on-demand remote assistance: technician
//! screen-sharing sessions against locally installed VNC/RDP server
//! products, and certificate-authorized file transfer. This crate is the
//! control plane only; the vendor products do the actual screen work.

// Core modules
pub mod backend;
pub mod command;
pub mod config;
pub mod credential;
pub mod error;
pub mod net;
pub mod notify;
pub mod session;
pub mod store;
pub mod trust;

// Re-export core types
pub use command::{AgentRequest, AgentResponse, CommandDispatcher};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use session::SessionManager;

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notify::DesktopNotifier;
use store::AgentStore;
use trust::cache::RevocationCache;
use trust::ocsp::OcspClient;
use trust::{Authorizer, TrustGateway};

/// Shared agent state handed to the command dispatcher and servers.
pub struct AgentState {
    pub config: Arc<RwLock<AgentConfig>>,
    pub store: AgentStore,
    pub session_manager: Arc<SessionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub shutdown: CancellationToken,
}

/// Wire the agent together: store, session manager, dispatcher, and the
/// trust gateway task. Returns once everything is running.
pub async fn bootstrap() -> AgentResult<AgentState> {
    let config_file = std::env::var("ASSIST_CONFIG").ok();
    let config = AgentConfig::load(config_file.as_deref())?;
    let store = AgentStore::open(&config.store_url).await?;
    let config = Arc::new(RwLock::new(config));

    let notifier = Arc::new(DesktopNotifier::new(10));
    let session_manager = Arc::new(
        SessionManager::new(config.clone(), notifier).with_store(store.clone()),
    );
    let dispatcher = Arc::new(CommandDispatcher::new(session_manager.clone(), config.clone()));

    let shutdown = CancellationToken::new();

    // The transfer gateway only comes up when the trust material is in
    // place; an agent without it still serves assistance sessions.
    let gateway_settings = config.read().await.gateway.clone();
    match start_gateway(&gateway_settings, store.clone(), shutdown.clone()) {
        Ok(()) => {}
        Err(e) => warn!("trust gateway not started: {}", e),
    }

    info!("remote assistance agent ready");

    Ok(AgentState {
        config,
        store,
        session_manager,
        dispatcher,
        shutdown,
    })
}

fn start_gateway(
    settings: &config::GatewaySettings,
    store: AgentStore,
    shutdown: CancellationToken,
) -> AgentResult<()> {
    let console_cert = trust::certs::load_certificate(&settings.console_cert_path)?;
    let ca_cert = trust::certs::load_certificate(&settings.ca_cert_path)?;

    let fetcher = Arc::new(OcspClient::new(
        settings.ocsp_url.clone(),
        settings.ocsp_timeout_secs,
    )?);
    let authorizer = Arc::new(Authorizer::new(
        console_cert,
        ca_cert,
        RevocationCache::new(store),
        fetcher,
    )?);

    let gateway = TrustGateway::new(authorizer);
    let settings = settings.clone();
    tokio::spawn(async move {
        if let Err(e) = gateway.serve(settings, shutdown).await {
            warn!("trust gateway terminated: {}", e);
        }
    });

    Ok(())
}
