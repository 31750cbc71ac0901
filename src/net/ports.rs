//! Port probing and allocation.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{AgentResult, ProxyError};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const ALLOCATION_ATTEMPTS: u16 = 64;

/// True when something already answers on the local port.
pub async fn port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Find a free port for the backend's private listener by probing
/// sequentially upward from just above the public proxy port.
pub async fn allocate_backend_port(public_port: u16) -> AgentResult<u16> {
    let start = public_port.saturating_add(1);
    for offset in 0..ALLOCATION_ATTEMPTS {
        let candidate = match start.checked_add(offset) {
            Some(port) => port,
            None => break,
        };
        // Binding is the authoritative test; the listener is dropped right
        // away and the backend takes the port over.
        if TcpListener::bind(("127.0.0.1", candidate)).await.is_ok() {
            return Ok(candidate);
        }
    }
    Err(ProxyError::NoPortAvailable(start).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unused_port_is_reported_free() {
        // Bind ephemeral, remember the port, release it.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!port_in_use(port).await);
    }

    #[tokio::test]
    async fn occupied_port_is_detected() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(port_in_use(port).await);
    }

    #[tokio::test]
    async fn allocation_skips_occupied_ports() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let occupied = listener.local_addr().unwrap().port();

        // The occupied port is first in the probe order; allocation must
        // land strictly above it.
        let allocated = allocate_backend_port(occupied - 1).await.unwrap();
        assert_ne!(allocated, occupied);
        assert!(allocated > occupied - 1);
    }
}
