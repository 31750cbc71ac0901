//! TLS WebSocket-to-TCP bridge.
//!
//! Exposes the loopback-bound backend port to remote viewers: each inbound
//! WebSocket connection on `/ws` is bridged to a fresh TCP connection to
//! `127.0.0.1:<internal_port>`, binary frames forwarded both ways until
//! either side closes. The proxy itself performs no authentication; the TLS
//! certificate and the loopback binding of the backend are the boundary.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentResult;
use crate::net::ports::port_in_use;
use crate::net::tls;

const WS_PATH: &str = "/ws";

pub struct ProxyServer {
    public_port: u16,
    internal_port: u16,
    cert_path: String,
    key_path: String,
}

impl ProxyServer {
    pub fn new(public_port: u16, internal_port: u16, cert_path: &str, key_path: &str) -> Self {
        Self {
            public_port,
            internal_port,
            cert_path: cert_path.to_string(),
            key_path: key_path.to_string(),
        }
    }

    /// Serve until cancelled. When the public port is already reachable,
    /// another instance is taken to be serving: the proxy logs that and
    /// returns without error, leaving the session without remote viewing.
    pub async fn serve(self, cancel: CancellationToken) -> AgentResult<()> {
        if port_in_use(self.public_port).await {
            warn!(
                "proxy port {} already occupied, remote viewing unavailable for this session",
                self.public_port
            );
            return Ok(());
        }

        let acceptor = tls::acceptor_from_pem(&self.cert_path, &self.key_path)?;
        let listener = TcpListener::bind(("0.0.0.0", self.public_port)).await?;
        info!(
            "proxy bridging wss://0.0.0.0:{}{} -> 127.0.0.1:{}",
            self.public_port, WS_PATH, self.internal_port
        );

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = cancel.cancelled() => {
                    info!("proxy listener closed");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    let internal_port = self.internal_port;
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_viewer(stream, peer, acceptor, internal_port, cancel).await
                        {
                            debug!("viewer {} disconnected: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("proxy accept failed: {}", e);
                }
            }
        }
    }
}

async fn handle_viewer(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: tokio_rustls::TlsAcceptor,
    internal_port: u16,
    cancel: CancellationToken,
) -> AgentResult<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| crate::error::ProxyError::Tls(e.to_string()))?;

    let ws_stream = tokio_tungstenite::accept_hdr_async(tls_stream, require_ws_path)
        .await
        .map_err(|e| crate::error::ProxyError::Handshake(e.to_string()))?;

    debug!("viewer {} connected", peer);

    let backend = TcpStream::connect(("127.0.0.1", internal_port))
        .await
        .map_err(|e| {
            warn!("backend connect on port {} failed: {}", internal_port, e);
            e
        })?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (mut backend_rx, mut backend_tx) = backend.into_split();

    let ws_to_backend = async {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if backend_tx.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                // Pings are answered by tungstenite; text frames are ignored.
                Ok(_) => {}
            }
        }
    };

    let backend_to_ws = async {
        let mut buffer = [0u8; 16384];
        loop {
            match backend_rx.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if ws_tx
                        .send(Message::binary(buffer[..n].to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = ws_to_backend => {}
        _ = backend_to_ws => {}
        _ = cancel.cancelled() => {
            debug!("viewer {} bridge cancelled", peer);
        }
    }

    debug!("viewer {} bridge closed", peer);
    Ok(())
}

fn require_ws_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        Ok(response)
    } else {
        let mut rejection = ErrorResponse::new(Some("not found".to_string()));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn occupied_public_port_refuses_without_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let proxy = ProxyServer::new(port, 5900, "missing-cert.pem", "missing-key.pem");
        // Returns immediately and cleanly: the occupied port means another
        // instance is serving, not a failure.
        let result = proxy.serve(CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_identity_material_is_an_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let free_port = listener.local_addr().unwrap().port();
        drop(listener);

        let proxy = ProxyServer::new(free_port, 5900, "missing-cert.pem", "missing-key.pem");
        let result = proxy.serve(CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
