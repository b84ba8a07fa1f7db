use thiserror::Error;

/// Broad classes of failure, for callers that need to decide between
/// aborting, re-prompting for a password, or reporting a bad path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The container bytes are not a readable archive.
    Format,
    /// A block allocation contract was violated.
    Allocation,
    /// A path could not be resolved or a tree mutation was refused.
    Traversal,
    /// Stored content does not match its recorded digest.
    Integrity,
    /// The underlying storage failed.
    Io,
    /// Key derivation or decryption failed (usually a wrong password).
    Security,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid archive signature")]
    InvalidSignature,

    #[error("Unsupported format version: {major}.{minor}.{bugfix}")]
    UnsupportedVersion { major: u8, minor: u8, bugfix: u8 },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),

    #[error("Malformed length field: {0}")]
    MalformedLength(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Block id {id} is out of range (total blocks: {total})")]
    BlockOutOfRange { id: u64, total: u64 },

    #[error("Block already allocated: {0}")]
    BlockAlreadyAllocated(u64),

    #[error("Interval set is empty")]
    EmptyIntervalSet,

    #[error("No such file or folder: {path}")]
    NotFound { path: String },

    #[error("Not a folder: {path}")]
    NotAFolder { path: String },

    #[error("Not a file: {path}")]
    NotAFile { path: String },

    #[error("Destination {path} already contains an entry named '{name}'")]
    NameConflict { path: String, name: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Integrity check failed for {path}")]
    IntegrityMismatch { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Authentication failed: wrong password or corrupted metadata")]
    AuthenticationFailed,

    #[error("Password unavailable: {0}")]
    PasswordUnavailable(String),
}

impl ArchiveError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ArchiveError::InvalidSignature
            | ArchiveError::UnsupportedVersion { .. }
            | ArchiveError::InvalidBlockSize(_)
            | ArchiveError::MalformedLength(_)
            | ArchiveError::Serialization(_) => ErrorCategory::Format,
            ArchiveError::BlockOutOfRange { .. }
            | ArchiveError::BlockAlreadyAllocated(_)
            | ArchiveError::EmptyIntervalSet => ErrorCategory::Allocation,
            ArchiveError::NotFound { .. }
            | ArchiveError::NotAFolder { .. }
            | ArchiveError::NotAFile { .. }
            | ArchiveError::NameConflict { .. }
            | ArchiveError::InvalidPath(_) => ErrorCategory::Traversal,
            ArchiveError::IntegrityMismatch { .. } => ErrorCategory::Integrity,
            ArchiveError::Io(_) => ErrorCategory::Io,
            ArchiveError::Security(_)
            | ArchiveError::AuthenticationFailed
            | ArchiveError::PasswordUnavailable(_) => ErrorCategory::Security,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
