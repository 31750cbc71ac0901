use serde::{Deserialize, Serialize};

/// Requests the management platform addresses to this endpoint. The bus
/// transport itself lives outside the agent; this is the payload contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "kebab-case")]
pub enum AgentRequest {
    StartSession {
        pin: String,
        #[serde(default)]
        notify_user: bool,
    },
    StopSession,
    PushConfig {
        document: serde_json::Value,
    },
}

/// Every request class gets an explicit acknowledgment, positive or
/// negative. There is no silent failure path back to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "detail", rename_all = "kebab-case")]
pub enum AgentResponse {
    Ack(String),
    Nack(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_wire_form() {
        let request: AgentRequest = serde_json::from_str(
            r#"{"request":"start-session","pin":"483920","notify_user":true}"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            AgentRequest::StartSession { ref pin, notify_user: true } if pin == "483920"
        ));
    }

    #[test]
    fn notify_flag_defaults_off() {
        let request: AgentRequest =
            serde_json::from_str(r#"{"request":"start-session","pin":"1"}"#).unwrap();
        assert!(matches!(
            request,
            AgentRequest::StartSession {
                notify_user: false,
                ..
            }
        ));
    }

    #[test]
    fn ack_round_trips() {
        let encoded = serde_json::to_string(&AgentResponse::Ack("Started".to_string())).unwrap();
        let decoded: AgentResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, AgentResponse::Ack("Started".to_string()));
    }
}
