use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    System(#[from] SystemError),
}

impl CoreError {
    /// True when the failure came from a damaged or unreadable snapshot and
    /// a fallback source should be tried.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

/// Errors raised while parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid window '{name}': {value} (must be >= {min})")]
    InvalidWindow {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("Invalid value for '{name}': {msg}")]
    InvalidValue { name: &'static str, msg: String },

    #[error("Failed to parse configuration")]
    Json(#[from] serde_json::Error),

    #[error("Failed to encode configuration")]
    Encoding(#[from] postcard::Error),

    #[error("Failed to read configuration file: {0}")]
    Read(String),
}

/// Errors related to file I/O around durable snapshots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Failed to write snapshot to '{path}': {msg}")]
    WriteFailed { path: String, msg: String },

    #[error("Failed to read snapshot from '{path}': {msg}")]
    ReadFailed { path: String, msg: String },

    #[error("Snapshot verification failed for '{path}': {msg}")]
    VerifyFailed { path: String, msg: String },

    #[error("Failed to replace '{path}': {msg}")]
    ReplaceFailed { path: String, msg: String },
}

/// Snapshot integrity failures. All of them are recoverable: the loader falls
/// back to the backup file and then to a fresh default state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Snapshot truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Bad magic constant: {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Unexpected {0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("Invalid field '{field}': {msg}")]
    InvalidField { field: &'static str, msg: String },
}

/// Errors that do not stem from input or storage.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Failed to serialize statistics: {0}")]
    Serialization(String),
}
