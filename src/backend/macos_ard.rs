//! macOS Remote Management backend.
//!
//! Drives the Apple Remote Desktop agent through `kickstart`. The VNC
//! legacy password path is the only scriptable credential store, and the
//! screen-sharing listener is fixed on 5900.

use async_trait::async_trait;
use tracing::warn;

use super::{run_command, BackendContext, RemoteDesktopBackend};
use crate::error::{AgentResult, BackendError, CredentialError};

pub const KICKSTART_BINARY: &str =
    "/System/Library/CoreServices/RemoteManagement/ARDAgent.app/Contents/Resources/kickstart";

const VNC_PORT: u16 = 5900;

pub struct MacosArdBackend {
    context: BackendContext,
}

impl MacosArdBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn kickstart(&self, args: &[&str]) -> AgentResult<String> {
        run_command(self.context.command_timeout, KICKSTART_BINARY, args).await
    }
}

#[async_trait]
impl RemoteDesktopBackend for MacosArdBackend {
    fn name(&self) -> &'static str {
        "MacOS Remote Management"
    }

    fn requires_proxy(&self) -> bool {
        true
    }

    fn fixed_port(&self) -> Option<u16> {
        Some(VNC_PORT)
    }

    async fn configure(&self) -> AgentResult<()> {
        self.kickstart(&["-configure", "-allowAccessFor", "-allUsers", "-privs", "-all"])
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Configuration(e.to_string()).into())
    }

    async fn save_pin(&self, pin: &str) -> AgentResult<()> {
        self.kickstart(&[
            "-configure",
            "-clientopts",
            "-setvnclegacy",
            "-vnclegacy",
            "yes",
            "-setvncpw",
            "-vncpw",
            pin,
        ])
        .await
        .map(|_| ())
        .map_err(|e| CredentialError::StoreWrite(e.to_string()).into())
    }

    async fn remove_pin(&self) -> AgentResult<()> {
        self.kickstart(&[
            "-configure",
            "-clientopts",
            "-setvnclegacy",
            "-vnclegacy",
            "no",
        ])
        .await
        .map(|_| ())
        .map_err(|e| CredentialError::StoreClear(e.to_string()).into())
    }

    async fn start_service(&self, _port: u16) -> AgentResult<()> {
        self.kickstart(&["-activate", "-restart", "-agent"])
            .await
            .map(|_| ())
    }

    async fn stop_service(&self) -> AgentResult<()> {
        if let Err(e) = self.kickstart(&["-deactivate"]).await {
            warn!("kickstart deactivate failed: {}", e);
        }
        self.kickstart(&["-stop"]).await.map(|_| ())
    }
}
