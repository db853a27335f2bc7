use zchat_crypto::CryptoError;

/// Outcome of a rejected chat operation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("message has been deleted")]
    AlreadyDeleted,

    #[error("encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Text safe to hand back to a client. Storage and crypto details stay in
    /// the server log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) => "internal server error".to_string(),
            Self::Encryption(_) => "failed to process message".to_string(),
            other => other.to_string(),
        }
    }
}
