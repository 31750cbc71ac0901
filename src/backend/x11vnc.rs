//! x11vnc backend (Linux, X11 sessions).
//!
//! The server runs as a child process bound to loopback; the PIN is written
//! to a password file in the vendor's hex form.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{run_command, BackendContext, RemoteDesktopBackend};
use crate::credential;
use crate::error::{AgentResult, BackendError, CredentialError};

pub const X11VNC_BINARY: &str = "/usr/bin/x11vnc";

const PASSWD_FILE: &str = ".assist/x11vnc.passwd";

pub struct X11VncBackend {
    context: BackendContext,
    child: Mutex<Option<tokio::process::Child>>,
}

impl X11VncBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            context: context.clone(),
            child: Mutex::new(None),
        }
    }

    fn passwd_path(&self) -> PathBuf {
        let home = self.context.home_dir.as_deref().unwrap_or("/root");
        PathBuf::from(home).join(PASSWD_FILE)
    }
}

#[async_trait]
impl RemoteDesktopBackend for X11VncBackend {
    fn name(&self) -> &'static str {
        "X11VNC"
    }

    fn requires_proxy(&self) -> bool {
        true
    }

    async fn configure(&self) -> AgentResult<()> {
        let path = self.passwd_path();
        let parent = path
            .parent()
            .ok_or_else(|| BackendError::Configuration("bad password file path".to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| BackendError::Configuration(e.to_string()))?;
        }

        Ok(())
    }

    async fn save_pin(&self, pin: &str) -> AgentResult<()> {
        let encoded = credential::encode_file_hex(pin)?;
        let path = self.passwd_path();
        tokio::fs::write(&path, encoded.as_bytes())
            .await
            .map_err(|e| CredentialError::StoreWrite(format!("{}: {}", path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| CredentialError::StoreWrite(e.to_string()))?;
        }

        Ok(())
    }

    async fn remove_pin(&self) -> AgentResult<()> {
        let path = self.passwd_path();
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| CredentialError::StoreClear(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn start_service(&self, port: u16) -> AgentResult<()> {
        let passwd = self.passwd_path();
        let port_arg = port.to_string();

        let child = tokio::process::Command::new(X11VNC_BINARY)
            .args([
                "-display",
                ":0",
                "-rfbport",
                &port_arg,
                "-localhost",
                "-passwdfile",
                &passwd.to_string_lossy(),
                "-forever",
                "-shared",
                "-quiet",
            ])
            .spawn()
            .map_err(|e| BackendError::CommandFailed(format!("x11vnc spawn: {}", e)))?;

        debug!("x11vnc started on loopback port {}", port);
        *self.child.lock().unwrap() = Some(child);
        Ok(())
    }

    async fn stop_service(&self) -> AgentResult<()> {
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!("x11vnc kill failed: {}", e);
            }
        }

        // Secondary cleanup by process name, independent of the handle.
        if let Err(e) = run_command(self.context.command_timeout, "pkill", &["-x", "x11vnc"]).await
        {
            debug!("x11vnc pkill cleanup: {}", e);
        }

        Ok(())
    }
}
