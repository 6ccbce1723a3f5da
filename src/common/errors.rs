use thiserror::Error;

/// Coarse classification of a transfer failure, used for rendering and exit handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportTransient,
    AuthenticationFailure,
    IntegrityMismatch,
    ProtocolViolation,
    RetriesExhausted,
    BatchAborted,
    Io,
}

/// Structured error types for the transfer engine
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("relay responded with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("request timed out")]
    Timeout,

    /// AEAD tag mismatch. Corruption in transit or tampering, never retried.
    #[error("authentication failed for file {file_index} chunk {chunk_index}")]
    AuthenticationFailure { file_index: u32, chunk_index: u32 },

    #[error("integrity mismatch for file {file_index}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file_index: u32,
        expected: String,
        actual: String,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("file {file_index} chunk {chunk_index} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        file_index: u32,
        chunk_index: u32,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    /// Atomic batch stopped because another file failed
    #[error("batch aborted after file {failed_index} failed")]
    BatchAborted { failed_index: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        TransferError::ProtocolViolation(msg.into())
    }

    /// Only transport level failures are worth another attempt. Client errors
    /// other than 408/429 will not change on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Transport(_) | TransferError::Timeout => true,
            TransferError::HttpStatus { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Transport(_) | TransferError::Timeout => ErrorKind::TransportTransient,
            TransferError::HttpStatus { .. } if self.is_transient() => {
                ErrorKind::TransportTransient
            }
            TransferError::HttpStatus { .. } => ErrorKind::ProtocolViolation,
            TransferError::AuthenticationFailure { .. } => ErrorKind::AuthenticationFailure,
            TransferError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            TransferError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            TransferError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            TransferError::BatchAborted { .. } => ErrorKind::BatchAborted,
            TransferError::Io(_) => ErrorKind::Io,
        }
    }

    /// Chunk the failure is attributed to, when there is one
    pub fn chunk_index(&self) -> Option<u32> {
        match self {
            TransferError::AuthenticationFailure { chunk_index, .. }
            | TransferError::RetriesExhausted { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransferError::Timeout;
        }
        if let Some(status) = err.status() {
            return TransferError::HttpStatus {
                status: status.as_u16(),
            };
        }
        TransferError::Transport(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TransferError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TransferError::Timeout
    }
}

/// Terminal failure of one file, with enough context to tell the user which and why
#[derive(Error, Debug)]
#[error("{name} (file {index}): {source}")]
pub struct FileError {
    pub index: u32,
    pub name: String,
    #[source]
    pub source: TransferError,
}

impl FileError {
    pub fn new(index: u32, name: impl Into<String>, source: TransferError) -> Self {
        Self {
            index,
            name: name.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
