//! GNOME Remote Desktop backend (Linux, Wayland sessions).
//!
//! Speaks RDP on its own routable port, so no bridge is started. All
//! control goes through `grdctl` and the user service manager.

use async_trait::async_trait;
use tracing::warn;

use super::{run_command, BackendContext, RemoteDesktopBackend};
use crate::error::{AgentResult, BackendError, CredentialError};

pub const GRDCTL_BINARY: &str = "/usr/bin/grdctl";

const RDP_PORT: u16 = 3389;
const SERVICE_UNIT: &str = "gnome-remote-desktop.service";
const SESSION_USER: &str = "assist";

pub struct GnomeRdpBackend {
    context: BackendContext,
}

impl GnomeRdpBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn grdctl(&self, args: &[&str]) -> AgentResult<()> {
        run_command(self.context.command_timeout, GRDCTL_BINARY, args)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RemoteDesktopBackend for GnomeRdpBackend {
    fn name(&self) -> &'static str {
        "GnomeRemoteDesktopRDP"
    }

    fn requires_proxy(&self) -> bool {
        false
    }

    fn fixed_port(&self) -> Option<u16> {
        Some(RDP_PORT)
    }

    async fn configure(&self) -> AgentResult<()> {
        self.grdctl(&["rdp", "enable"])
            .await
            .map_err(|e| BackendError::Configuration(e.to_string()))?;
        // The technician drives the session; view-only defeats assistance.
        self.grdctl(&["rdp", "disable-view-only"])
            .await
            .map_err(|e| BackendError::Configuration(e.to_string()))?;
        Ok(())
    }

    async fn save_pin(&self, pin: &str) -> AgentResult<()> {
        self.grdctl(&["rdp", "set-credentials", SESSION_USER, pin])
            .await
            .map_err(|e| CredentialError::StoreWrite(e.to_string()).into())
    }

    async fn remove_pin(&self) -> AgentResult<()> {
        self.grdctl(&["rdp", "clear-credentials"])
            .await
            .map_err(|e| CredentialError::StoreClear(e.to_string()).into())
    }

    async fn start_service(&self, _port: u16) -> AgentResult<()> {
        run_command(
            self.context.command_timeout,
            "systemctl",
            &["--user", "start", SERVICE_UNIT],
        )
        .await
        .map(|_| ())
    }

    async fn stop_service(&self) -> AgentResult<()> {
        if let Err(e) = self.grdctl(&["rdp", "disable"]).await {
            warn!("grdctl rdp disable failed: {}", e);
        }

        run_command(
            self.context.command_timeout,
            "systemctl",
            &["--user", "stop", SERVICE_UNIT],
        )
        .await
        .map(|_| ())
    }
}
