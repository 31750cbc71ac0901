// Network bridge module
pub mod ports;
pub mod proxy;
pub mod tls;

pub use ports::{allocate_backend_port, port_in_use};
pub use proxy::ProxyServer;
