//! Remote desktop backend registry.
//!
//! One implementation per vendor product, selected at runtime through an
//! explicit, ordered discovery list per platform. Ordering is part of the
//! contract: for a fixed host state, `discover` always returns the same
//! backend.

pub mod gnome_rdp;
pub mod macos_ard;
pub mod tightvnc;
pub mod x11vnc;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{AgentResult, BackendError};

pub use gnome_rdp::GnomeRdpBackend;
pub use macos_ard::MacosArdBackend;
pub use tightvnc::TightVncBackend;
pub use x11vnc::X11VncBackend;

/// Capability surface of one vendor remote desktop product.
///
/// A backend is exclusively owned by the active session; at most one is
/// live per agent instance.
#[async_trait]
pub trait RemoteDesktopBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a network bridge must be started. False when the backend
    /// already speaks a routable protocol (RDP).
    fn requires_proxy(&self) -> bool;

    /// Port the backend always listens on, or `None` when a free port must
    /// be allocated and passed to `start_service`.
    fn fixed_port(&self) -> Option<u16> {
        None
    }

    /// Prepare vendor settings: loopback-only binding, risky features off.
    async fn configure(&self) -> AgentResult<()>;

    /// Persist the session PIN in the vendor's native credential store.
    async fn save_pin(&self, pin: &str) -> AgentResult<()>;

    /// Clear the stored credential.
    async fn remove_pin(&self) -> AgentResult<()>;

    async fn start_service(&self, port: u16) -> AgentResult<()>;

    async fn stop_service(&self) -> AgentResult<()>;
}

/// Host facts the discovery probes consult, injectable so tests can pin a
/// host state.
pub trait HostProbe: Send + Sync {
    fn os(&self) -> &'static str;
    fn binary_exists(&self, path: &str) -> bool;
    fn env_var(&self, name: &str) -> Option<String>;
}

pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn os(&self) -> &'static str {
        std::env::consts::OS
    }

    fn binary_exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Shared construction context for backend instances.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub command_timeout: Duration,
    pub home_dir: Option<String>,
}

impl BackendContext {
    pub fn new(command_timeout_secs: u64) -> Self {
        Self {
            command_timeout: Duration::from_secs(command_timeout_secs),
            home_dir: std::env::var("HOME").ok(),
        }
    }
}

struct Candidate {
    name: &'static str,
    installed: fn(&dyn HostProbe) -> bool,
    build: fn(&BackendContext) -> Arc<dyn RemoteDesktopBackend>,
}

fn wayland_session(probe: &dyn HostProbe) -> bool {
    probe
        .env_var("XDG_SESSION_TYPE")
        .map(|v| v.eq_ignore_ascii_case("wayland"))
        .unwrap_or(false)
        || probe.env_var("WAYLAND_DISPLAY").is_some()
}

// Priority order per platform. First installed candidate wins; the slices
// are the single source of truth for ordering.
const WINDOWS_BACKENDS: &[Candidate] = &[Candidate {
    name: "TightVNC",
    installed: |probe| {
        probe.binary_exists(tightvnc::SERVER_BINARY)
            || probe.binary_exists(tightvnc::SERVER_BINARY_X86)
    },
    build: |ctx| Arc::new(TightVncBackend::new(ctx)),
}];

const LINUX_BACKENDS: &[Candidate] = &[
    Candidate {
        name: "GnomeRemoteDesktopRDP",
        installed: |probe| wayland_session(probe) && probe.binary_exists(gnome_rdp::GRDCTL_BINARY),
        build: |ctx| Arc::new(GnomeRdpBackend::new(ctx)),
    },
    Candidate {
        name: "X11VNC",
        installed: |probe| !wayland_session(probe) && probe.binary_exists(x11vnc::X11VNC_BINARY),
        build: |ctx| Arc::new(X11VncBackend::new(ctx)),
    },
];

const MACOS_BACKENDS: &[Candidate] = &[Candidate {
    name: "MacOS Remote Management",
    installed: |probe| probe.binary_exists(macos_ard::KICKSTART_BINARY),
    build: |ctx| Arc::new(MacosArdBackend::new(ctx)),
}];

/// Resolve the backend for this host, first match in priority order.
pub fn discover(
    probe: &dyn HostProbe,
    context: &BackendContext,
) -> AgentResult<Arc<dyn RemoteDesktopBackend>> {
    let candidates: &[Candidate] = match probe.os() {
        "windows" => WINDOWS_BACKENDS,
        "linux" => LINUX_BACKENDS,
        "macos" => MACOS_BACKENDS,
        other => {
            debug!("no remote desktop backends known for {}", other);
            return Err(BackendError::Unavailable.into());
        }
    };

    for candidate in candidates {
        if (candidate.installed)(probe) {
            info!("discovered remote desktop backend: {}", candidate.name);
            return Ok((candidate.build)(context));
        }
        debug!("backend {} not present", candidate.name);
    }

    Err(BackendError::Unavailable.into())
}

/// Run one external control command, bounded by the context timeout. Expiry
/// maps to the same failure class as an unavailable backend.
pub(crate) async fn run_command(
    timeout: Duration,
    program: &str,
    args: &[&str],
) -> AgentResult<String> {
    let label = format!("{} {}", program, args.join(" "));
    debug!("running backend command: {}", label);

    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| BackendError::CommandTimeout(label.clone()))?
    .map_err(|e| BackendError::CommandFailed(format!("{}: {}", label, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::CommandFailed(format!(
            "{}: exit {:?}: {}",
            label,
            output.status.code(),
            stderr.trim()
        ))
        .into());
    }

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    struct FakeProbe {
        os: &'static str,
        binaries: HashSet<&'static str>,
        env: HashMap<&'static str, &'static str>,
    }

    impl HostProbe for FakeProbe {
        fn os(&self) -> &'static str {
            self.os
        }

        fn binary_exists(&self, path: &str) -> bool {
            self.binaries.contains(path)
        }

        fn env_var(&self, name: &str) -> Option<String> {
            self.env.get(name).map(|v| v.to_string())
        }
    }

    fn context() -> BackendContext {
        BackendContext {
            command_timeout: Duration::from_secs(5),
            home_dir: Some("/home/test".to_string()),
        }
    }

    #[test]
    fn wayland_host_selects_gnome_rdp() {
        let probe = FakeProbe {
            os: "linux",
            binaries: [gnome_rdp::GRDCTL_BINARY, x11vnc::X11VNC_BINARY].into(),
            env: [("XDG_SESSION_TYPE", "wayland")].into(),
        };

        let backend = discover(&probe, &context()).unwrap();
        assert_eq!(backend.name(), "GnomeRemoteDesktopRDP");
        assert!(!backend.requires_proxy());
    }

    #[test]
    fn x11_host_selects_x11vnc() {
        let probe = FakeProbe {
            os: "linux",
            binaries: [gnome_rdp::GRDCTL_BINARY, x11vnc::X11VNC_BINARY].into(),
            env: [("XDG_SESSION_TYPE", "x11")].into(),
        };

        let backend = discover(&probe, &context()).unwrap();
        assert_eq!(backend.name(), "X11VNC");
        assert!(backend.requires_proxy());
    }

    #[test]
    fn discovery_is_deterministic_across_calls() {
        let probe = FakeProbe {
            os: "linux",
            binaries: [gnome_rdp::GRDCTL_BINARY, x11vnc::X11VNC_BINARY].into(),
            env: [("XDG_SESSION_TYPE", "wayland")].into(),
        };

        let first = discover(&probe, &context()).unwrap().name();
        for _ in 0..16 {
            assert_eq!(discover(&probe, &context()).unwrap().name(), first);
        }
    }

    #[test]
    fn windows_host_selects_tightvnc() {
        let probe = FakeProbe {
            os: "windows",
            binaries: [tightvnc::SERVER_BINARY].into(),
            env: HashMap::new(),
        };

        let backend = discover(&probe, &context()).unwrap();
        assert_eq!(backend.name(), "TightVNC");
    }

    #[test]
    fn bare_host_has_no_backend() {
        let probe = FakeProbe {
            os: "linux",
            binaries: HashSet::new(),
            env: HashMap::new(),
        };

        assert!(matches!(
            discover(&probe, &context()),
            Err(crate::error::AgentError::Backend(BackendError::Unavailable))
        ));
    }
}
