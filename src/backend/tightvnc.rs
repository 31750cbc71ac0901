//! TightVNC server backend (Windows).
//!
//! All control goes through `reg` and the service manager; the PIN lands as
//! the registry-stored binary password the server reads natively.

use async_trait::async_trait;
use tracing::warn;

use super::{run_command, BackendContext, RemoteDesktopBackend};
use crate::credential;
use crate::error::{AgentResult, BackendError, CredentialError};

pub const SERVER_BINARY: &str = r"C:\Program Files\TightVNC\tvnserver.exe";
pub const SERVER_BINARY_X86: &str = r"C:\Program Files (x86)\TightVNC\tvnserver.exe";

const SERVER_KEY: &str = r"HKLM\SOFTWARE\TightVNC\Server";
const SERVICE_NAME: &str = "tvnserver";

pub struct TightVncBackend {
    context: BackendContext,
}

impl TightVncBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn reg_set_dword(&self, value: &str, data: u32) -> AgentResult<()> {
        run_command(
            self.context.command_timeout,
            "reg",
            &[
                "add",
                SERVER_KEY,
                "/v",
                value,
                "/t",
                "REG_DWORD",
                "/d",
                &data.to_string(),
                "/f",
            ],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl RemoteDesktopBackend for TightVncBackend {
    fn name(&self) -> &'static str {
        "TightVNC"
    }

    fn requires_proxy(&self) -> bool {
        true
    }

    async fn configure(&self) -> AgentResult<()> {
        // Loopback only; the proxy is the sole route in. HTTP viewer and
        // remote shutdown stay off.
        self.reg_set_dword("AllowLoopback", 1).await?;
        self.reg_set_dword("LoopbackOnly", 1).await?;
        self.reg_set_dword("AcceptHttpConnections", 0).await?;
        self.reg_set_dword("AllowShutdown", 0).await?;
        Ok(())
    }

    async fn save_pin(&self, pin: &str) -> AgentResult<()> {
        let encoded = credential::encode_registry(pin)?;
        run_command(
            self.context.command_timeout,
            "reg",
            &[
                "add",
                SERVER_KEY,
                "/v",
                "Password",
                "/t",
                "REG_BINARY",
                "/d",
                &hex::encode(encoded),
                "/f",
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| CredentialError::StoreWrite(e.to_string()).into())
    }

    async fn remove_pin(&self) -> AgentResult<()> {
        run_command(
            self.context.command_timeout,
            "reg",
            &["delete", SERVER_KEY, "/v", "Password", "/f"],
        )
        .await
        .map(|_| ())
        .map_err(|e| CredentialError::StoreClear(e.to_string()).into())
    }

    async fn start_service(&self, port: u16) -> AgentResult<()> {
        self.reg_set_dword("RfbPort", u32::from(port)).await?;
        run_command(
            self.context.command_timeout,
            "net",
            &["start", SERVICE_NAME],
        )
        .await
        .map(|_| ())
        .map_err(|e| BackendError::CommandFailed(format!("service start: {}", e)).into())
    }

    async fn stop_service(&self) -> AgentResult<()> {
        let graceful = run_command(
            self.context.command_timeout,
            "net",
            &["stop", SERVICE_NAME],
        )
        .await;
        if let Err(e) = &graceful {
            warn!("graceful TightVNC stop failed: {}", e);
        }

        // Secondary cleanup independent of the graceful outcome.
        if let Err(e) = run_command(
            self.context.command_timeout,
            "taskkill",
            &["/F", "/IM", "tvnserver.exe"],
        )
        .await
        {
            warn!("tvnserver force kill failed: {}", e);
        }

        graceful.map(|_| ())
    }
}
