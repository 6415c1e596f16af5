use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("crypto error: {0}")]
    Crypto(#[from] nebula_crypto::CryptoError),

    #[error("network error: {0}")]
    Network(#[from] nebula_network::NetworkError),

    #[error("transport error: {0}")]
    Transport(#[from] nebula_network::TransportError),

    #[error("handshake error: {0}")]
    Handshake(#[from] nebula_network::HandshakeError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("node is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}
