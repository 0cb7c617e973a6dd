use thiserror::Error;

/// Errors raised by the handshake, the cipher registry and the blob container.
///
/// Every variant is `Clone` so that a failed context can hand the same
/// failure back on every later call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SrdError {
    /// Malformed or out-of-sequence handshake message.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Peer proof (MAC, channel binding, key share) did not verify.
    #[error("Authentication failed")]
    Authentication,
    /// Unsupported cipher, wrong key length, missing blob and the like.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Authenticated decryption rejected the ciphertext.
    #[error("Decryption failed (integrity check)")]
    Integrity,
    /// Decoded bytes are not a valid frame.
    #[error("Format error: {0}")]
    Format(String),
    /// A primitive failed for a reason unrelated to the input.
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, SrdError>;

impl From<bincode::Error> for SrdError {
    fn from(err: bincode::Error) -> Self {
        SrdError::Format(err.to_string())
    }
}

impl From<base64::DecodeError> for SrdError {
    fn from(err: base64::DecodeError) -> Self {
        SrdError::Format(err.to_string())
    }
}
