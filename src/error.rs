use thiserror::Error;

/// Main error type for the remote assistance agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Credential operation failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Session management error: {0}")]
    Session(#[from] SessionError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Trust validation failed: {0}")]
    Trust(#[from] TrustError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum BackendError {
    /// No supported remote desktop product installed for this platform.
    #[error("no remote desktop backend available on this host")]
    Unavailable,

    #[error("backend configuration failed: {0}")]
    Configuration(String),

    /// External control utility did not finish within the bounded interval.
    #[error("backend command timed out: {0}")]
    CommandTimeout(String),

    #[error("backend command failed: {0}")]
    CommandFailed(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("PIN encoding failed")]
    Encoding,

    #[error("credential store write failed: {0}")]
    StoreWrite(String),

    #[error("credential store clear failed: {0}")]
    StoreClear(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// A second start while a session is active is rejected outright.
    #[error("a remote assistance session is already active")]
    AlreadyActive,

    #[error("no active session")]
    NotActive,

    #[error("session establishment cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Non-fatal to the session: remote viewing is unavailable, nothing else.
    #[error("proxy port {0} is already occupied")]
    PortUnavailable(u16),

    #[error("no free backend port in range starting at {0}")]
    NoPortAvailable(u16),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("offered public key does not match the console certificate")]
    KeyMismatch,

    #[error("certificate revoked or status unknown")]
    NotTrusted,

    #[error("certificate parse failed: {0}")]
    CertificateParse(String),

    #[error("OCSP request failed: {0}")]
    OcspRequest(String),

    #[error("OCSP response malformed: {0}")]
    OcspResponse(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed")]
    ConnectionFailed,

    #[error("process spawn failed: {0}")]
    Spawn(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
