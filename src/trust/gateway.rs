//! SSH front end for authorized file transfer.
//!
//! Exposes a single `sftp` subsystem. Authentication is public-key only and
//! is delegated to the [`Authorizer`]: the offered key must match the console
//! certificate and the certificate must pass the cached revocation check.
//! Rejected peers never reach the subsystem.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::ssh_key::public::KeyData;
use russh::keys::{Algorithm, PrivateKey, PublicKey};
use russh::server::{Auth, Config as SshServerConfig, Msg, Server, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GatewaySettings;
use crate::error::{AgentError, AgentResult};
use crate::trust::sftp::SftpSession;
use crate::trust::Authorizer;

pub struct TrustGateway {
    authorizer: Arc<Authorizer>,
}

impl TrustGateway {
    pub fn new(authorizer: Arc<Authorizer>) -> Self {
        Self { authorizer }
    }

    /// Accept loop for the transfer gateway. Blocks until cancelled.
    pub async fn serve(
        mut self,
        settings: GatewaySettings,
        cancel: CancellationToken,
    ) -> AgentResult<()> {
        let host_key = load_or_generate_host_key(&settings.host_key_path)?;

        let config = SshServerConfig {
            methods: MethodSet::from([MethodKind::PublicKey].as_slice()),
            auth_rejection_time: std::time::Duration::from_secs(1),
            keys: vec![host_key],
            ..Default::default()
        };

        let addr: SocketAddr = ([0, 0, 0, 0], settings.port).into();
        info!("trust gateway listening on {}", addr);

        tokio::select! {
            result = self.run_on_address(Arc::new(config), addr) => {
                result.map_err(|e| AgentError::Transport(
                    crate::error::TransportError::Other(e.to_string()),
                ))
            }
            _ = cancel.cancelled() => {
                info!("trust gateway shutting down");
                Ok(())
            }
        }
    }
}

impl Server for TrustGateway {
    type Handler = GatewayConnection;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> GatewayConnection {
        debug!("transfer connection attempt from {:?}", peer);
        GatewayConnection {
            authorizer: self.authorizer.clone(),
            authorized: false,
            channels: HashMap::new(),
        }
    }
}

pub struct GatewayConnection {
    authorizer: Arc<Authorizer>,
    authorized: bool,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl russh::server::Handler for GatewayConnection {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let Some((modulus, exponent)) = rsa_components(public_key) else {
            warn!("rejecting non-RSA key offered by {}", user);
            return Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            });
        };

        if self.authorizer.is_authorized(&modulus, &exponent).await {
            info!("transfer session authorized for {}", user);
            self.authorized = true;
            Ok(Auth::Accept)
        } else {
            warn!("transfer session rejected for {}", user);
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.authorized {
            return Ok(false);
        }
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != "sftp" || !self.authorized {
            warn!("refusing subsystem request '{}'", name);
            session.channel_failure(channel_id)?;
            return Ok(());
        }

        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        session.channel_success(channel_id)?;
        let stream = channel.into_stream();
        tokio::spawn(async move {
            russh_sftp::server::run(stream, SftpSession::new()).await;
            debug!("sftp subsystem closed");
        });

        Ok(())
    }
}

/// RSA modulus/exponent from an offered SSH key, leading zeros stripped to
/// match the certificate-side normalization.
fn rsa_components(key: &PublicKey) -> Option<(Vec<u8>, Vec<u8>)> {
    match key.key_data() {
        KeyData::Rsa(rsa) => {
            let n = rsa.n.as_positive_bytes().unwrap_or(rsa.n.as_bytes());
            let e = rsa.e.as_positive_bytes().unwrap_or(rsa.e.as_bytes());
            Some((n.to_vec(), e.to_vec()))
        }
        _ => None,
    }
}

/// Load the gateway host key, generating an Ed25519 key on first start.
fn load_or_generate_host_key(path: &str) -> AgentResult<PrivateKey> {
    if std::path::Path::new(path).exists() {
        return russh::keys::load_secret_key(path, None)
            .map_err(|e| AgentError::Config(format!("host key {}: {}", path, e)));
    }

    let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
        .map_err(|e| AgentError::Config(format!("host key generation: {}", e)))?;

    match key.to_openssh(russh::keys::ssh_key::LineEnding::LF) {
        Ok(encoded) => {
            if let Err(e) = std::fs::write(path, encoded.as_bytes()) {
                error!("could not persist generated host key to {}: {}", path, e);
            }
        }
        Err(e) => error!("could not encode generated host key: {}", e),
    }

    Ok(key)
}
