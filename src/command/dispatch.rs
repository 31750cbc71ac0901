use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::session::SessionManager;

use super::types::{AgentRequest, AgentResponse};

/// Maps bus requests onto the session manager and the live configuration.
/// Always answers: the original agent occasionally dropped failure acks on
/// the floor, this one does not.
pub struct CommandDispatcher {
    manager: Arc<SessionManager>,
    config: Arc<RwLock<AgentConfig>>,
}

impl CommandDispatcher {
    pub fn new(manager: Arc<SessionManager>, config: Arc<RwLock<AgentConfig>>) -> Self {
        Self { manager, config }
    }

    pub async fn handle(&self, request: AgentRequest) -> AgentResponse {
        match request {
            AgentRequest::StartSession { pin, notify_user } => {
                match self.manager.start(&pin, notify_user).await {
                    Ok(()) => AgentResponse::Ack("Started".to_string()),
                    Err(e) => {
                        error!("start-session failed: {}", e);
                        AgentResponse::Nack(e.to_string())
                    }
                }
            }
            AgentRequest::StopSession => match self.manager.stop().await {
                Ok(()) => AgentResponse::Ack("Stopped".to_string()),
                Err(e) => {
                    error!("stop-session failed: {}", e);
                    AgentResponse::Nack(e.to_string())
                }
            },
            AgentRequest::PushConfig { document } => {
                let merged = {
                    let current = self.config.read().await;
                    current.merged_with(&document)
                };
                match merged {
                    Ok(updated) => {
                        *self.config.write().await = updated;
                        info!("pushed configuration applied");
                        AgentResponse::Ack("Applied".to_string())
                    }
                    Err(e) => {
                        error!("pushed configuration rejected: {}", e);
                        AgentResponse::Nack(e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentResult;
    use crate::notify::UserNotifier;
    use async_trait::async_trait;
    use serde_json::json;

    struct SilentNotifier;

    #[async_trait]
    impl UserNotifier for SilentNotifier {
        async fn notify_pin(&self, _pin: &str) -> AgentResult<()> {
            Ok(())
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let config = Arc::new(RwLock::new(AgentConfig::default()));
        let manager = Arc::new(SessionManager::new(config.clone(), Arc::new(SilentNotifier)));
        CommandDispatcher::new(manager, config)
    }

    #[tokio::test]
    async fn stop_without_session_nacks() {
        let dispatcher = dispatcher();
        let response = dispatcher.handle(AgentRequest::StopSession).await;
        assert!(matches!(response, AgentResponse::Nack(_)));
    }

    #[tokio::test]
    async fn push_config_acks_and_applies() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(AgentRequest::PushConfig {
                document: json!({ "proxy": { "port": 9999 } }),
            })
            .await;

        assert_eq!(response, AgentResponse::Ack("Applied".to_string()));
        assert_eq!(dispatcher.config.read().await.proxy.port, 9999);
    }

    #[tokio::test]
    async fn invalid_push_config_nacks() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(AgentRequest::PushConfig {
                document: json!({ "proxy": { "port": "oops" } }),
            })
            .await;

        assert!(matches!(response, AgentResponse::Nack(_)));
        // Previous configuration stays in effect.
        assert_eq!(dispatcher.config.read().await.proxy.port, 8591);
    }
}
