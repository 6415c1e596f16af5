use nebula_types::TypesError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(TypesError),

    #[error("malformed address {input:?}: {reason}")]
    AddressParse { input: String, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("wire codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<TypesError> for NetworkError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::InvalidAddress(input) => Self::AddressParse {
                input,
                reason: "not a routable address".into(),
            },
            other => Self::InvalidIdentifier(other),
        }
    }
}
