use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
