//! Error types for snapshot memory access.

use thiserror::Error;

/// Errors that can occur while resolving or reading snapshot memory.
#[derive(Error, Debug)]
pub enum SpaceError {
    /// No Region covers the address in the given address space.
    #[error("Address {address:#x} is not mapped in address space {asid}")]
    Unmapped { asid: u32, address: u64 },

    /// A Region covers the address, but its bytes live in an auxiliary
    /// source that is missing or has been released.
    #[error("Address {address:#x} in address space {asid} is backed by unavailable source '{source_name}'")]
    ResidencyUnavailable {
        asid: u32,
        address: u64,
        source_name: String,
    },

    /// The backing file ended before the requested bytes could be read.
    #[error("Short read from '{source_name}' at offset {offset:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        source_name: String,
        offset: u64,
        wanted: usize,
        got: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested length cannot be served (overflow, zero alignment, ...).
    #[error("Invalid length {length:#x} at {address:#x}: {message}")]
    InvalidLength {
        address: u64,
        length: u64,
        message: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The byte source has been destroyed and cannot be used.
    #[error("Source '{0}' has been destroyed")]
    SourceDestroyed(String),
}

impl SpaceError {
    /// Create an Unmapped error.
    pub fn unmapped(asid: u32, address: u64) -> Self {
        SpaceError::Unmapped { asid, address }
    }

    /// Create a ResidencyUnavailable error.
    pub fn residency_unavailable(asid: u32, address: u64, source_name: impl Into<String>) -> Self {
        SpaceError::ResidencyUnavailable {
            asid,
            address,
            source_name: source_name.into(),
        }
    }

    /// Create a ShortRead error.
    pub fn short_read(source_name: impl Into<String>, offset: u64, wanted: usize, got: usize) -> Self {
        SpaceError::ShortRead {
            source_name: source_name.into(),
            offset,
            wanted,
            got,
        }
    }

    /// Create an InvalidLength error.
    pub fn invalid_length(address: u64, length: u64, msg: impl Into<String>) -> Self {
        SpaceError::InvalidLength {
            address,
            length,
            message: msg.into(),
        }
    }

    /// Create a SourceDestroyed error.
    pub fn source_destroyed(name: impl Into<String>) -> Self {
        SpaceError::SourceDestroyed(name.into())
    }

    /// True for the errors that mean "nothing readable lives at this address",
    /// as opposed to a failure of the backing file itself.
    pub fn is_unmapped(&self) -> bool {
        matches!(
            self,
            SpaceError::Unmapped { .. } | SpaceError::ResidencyUnavailable { .. }
        )
    }
}

/// Result type for snapshot memory operations.
pub type SpaceResult<T> = Result<T, SpaceError>;
