//! Local-user PIN notification.
//!
//! Shows the session PIN to the person at the machine, out of band from the
//! technician's channel. Failure here never aborts a session; callers log
//! and continue.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AgentResult, TransportError};

#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn notify_pin(&self, pin: &str) -> AgentResult<()>;
}

pub struct DesktopNotifier {
    timeout: Duration,
}

impl DesktopNotifier {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn command_line(pin: &str) -> (&'static str, Vec<String>) {
        let text = format!("Remote assistance session requested. PIN: {}", pin);
        if cfg!(target_os = "windows") {
            ("msg", vec!["*".to_string(), "/TIME:30".to_string(), text])
        } else if cfg!(target_os = "macos") {
            (
                "osascript",
                vec![
                    "-e".to_string(),
                    format!(
                        "display notification \"{}\" with title \"Remote Assistance\"",
                        text
                    ),
                ],
            )
        } else {
            (
                "notify-send",
                vec!["Remote Assistance".to_string(), text],
            )
        }
    }
}

#[async_trait]
impl UserNotifier for DesktopNotifier {
    async fn notify_pin(&self, pin: &str) -> AgentResult<()> {
        let (program, args) = Self::command_line(pin);
        debug!("notifying local user via {}", program);

        let status = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(program).args(&args).status(),
        )
        .await
        .map_err(|_| TransportError::Other(format!("{} timed out", program)))?
        .map_err(|e| TransportError::Spawn(format!("{}: {}", program, e)))?;

        if !status.success() {
            return Err(TransportError::Other(format!(
                "{} exited with {:?}",
                program,
                status.code()
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_carries_the_pin() {
        let (_, args) = DesktopNotifier::command_line("483920");
        assert!(args.iter().any(|a| a.contains("483920")));
    }
}
