//! Agent configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then `ASSIST_*`
//! environment variables. The management platform can additionally push a
//! JSON config document at runtime; it is merged over the current values and
//! applied silently (logged, no acknowledgment payload beyond the ack).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub proxy: ProxySettings,
    pub gateway: GatewaySettings,
    /// SQLite URL for the process-local store. Recreated on every start.
    pub store_url: String,
    /// Bound on any single external backend-control command.
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Public TLS port remote viewers connect to.
    pub port: u16,
    /// Machine identity material issued by the management platform.
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub port: u16,
    pub host_key_path: String,
    /// Console certificate whose embedded key authorizes transfers.
    pub console_cert_path: String,
    /// Issuing CA certificate, target of OCSP status requests.
    pub ca_cert_path: String,
    /// Override for the OCSP responder; the certificate AIA is used if unset.
    pub ocsp_url: Option<String>,
    pub ocsp_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            proxy: ProxySettings::default(),
            gateway: GatewaySettings::default(),
            store_url: "sqlite://assist-agent.db".to_string(),
            command_timeout_secs: 30,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            port: 8591,
            cert_path: "agent-cert.pem".to_string(),
            key_path: "agent-key.pem".to_string(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 8592,
            host_key_path: "gateway-host-key".to_string(),
            console_cert_path: "console-cert.pem".to_string(),
            ca_cert_path: "ca-cert.pem".to_string(),
            ocsp_url: None,
            ocsp_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    /// Load defaults, the optional config file, and environment overrides.
    pub fn load(file: Option<&str>) -> AgentResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("ASSIST").separator("__"))
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;

        // Unset keys fall back through the serde defaults.
        settings
            .try_deserialize::<AgentConfig>()
            .map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Apply a pushed JSON config document over the current values.
    pub fn merged_with(&self, document: &serde_json::Value) -> AgentResult<Self> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, document);
        let merged: AgentConfig = serde_json::from_value(base)?;
        info!("agent configuration updated");
        Ok(merged)
    }
}

fn merge_json(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_complete() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.proxy.port, 8591);
        assert_eq!(cfg.gateway.ocsp_timeout_secs, 10);
    }

    #[test]
    fn push_merges_partial_document() {
        let cfg = AgentConfig::default();
        let pushed = json!({
            "proxy": { "port": 9443 },
            "gateway": { "ocsp_url": "http://ocsp.example.test" }
        });

        let merged = cfg.merged_with(&pushed).unwrap();
        assert_eq!(merged.proxy.port, 9443);
        // Untouched keys survive the overlay.
        assert_eq!(merged.proxy.cert_path, "agent-cert.pem");
        assert_eq!(
            merged.gateway.ocsp_url.as_deref(),
            Some("http://ocsp.example.test")
        );
    }

    #[test]
    fn push_with_invalid_values_is_rejected() {
        let cfg = AgentConfig::default();
        let pushed = json!({ "proxy": { "port": "not-a-port" } });
        assert!(cfg.merged_with(&pushed).is_err());
    }
}
