//! Error types for the Drivestor pool engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Drivestor pool engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Topology / Configuration Errors
    // =========================================================================
    /// Topology parameters do not partition the drive ID space
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Drive ID outside of the pool
    #[error("Drive {drive_id} out of range (pool has {total} drives)")]
    DriveOutOfRange { drive_id: usize, total: usize },

    /// Fault domain ID outside of the pool
    #[error("Fault domain {domain_id} out of range (pool has {total} domains)")]
    DomainOutOfRange { domain_id: usize, total: usize },

    // =========================================================================
    // Striping / Recovery Errors
    // =========================================================================
    /// Input does not fit the online capacity
    #[error("Insufficient capacity: need {required} bytes, {available} bytes available")]
    CapacityExceeded { required: u64, available: u64 },

    /// A rebuild target cannot be reconstructed from surviving peers
    #[error("Insufficient redundancy to rebuild drive {drive_id}: {reason}")]
    InsufficientRedundancy { drive_id: usize, reason: String },

    /// HA mode could not select a full stripe width of drives
    #[error("Insufficient redundancy: HA mode requires {required} drives, only {selected} available")]
    HaSelection { selected: usize, required: usize },

    /// A multi-file write was given no files
    #[error("No input files supplied")]
    EmptyInput,

    /// Nothing has been written to the pool yet
    #[error("No data has been written to the pool")]
    ManifestMissing,

    /// Multi-file header could not be parsed
    #[error("Corrupt file header: {0}")]
    CorruptHeader(String),

    // =========================================================================
    // Block Store Errors
    // =========================================================================
    /// Backing store rejected an operation
    #[error("Block store error on drive {drive_id}: {reason}")]
    BlockStore { drive_id: usize, reason: String },

    /// State (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True for both flavours of redundancy shortfall.
    pub fn is_insufficient_redundancy(&self) -> bool {
        matches!(
            self,
            Error::InsufficientRedundancy { .. } | Error::HaSelection { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundancy_classification() {
        let rebuild = Error::InsufficientRedundancy {
            drive_id: 3,
            reason: "parity offline".to_string(),
        };
        let ha = Error::HaSelection {
            selected: 16,
            required: 18,
        };
        assert!(rebuild.is_insufficient_redundancy());
        assert!(ha.is_insufficient_redundancy());
        assert!(!Error::ManifestMissing.is_insufficient_redundancy());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::CapacityExceeded {
            required: 8192,
            available: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient capacity: need 8192 bytes, 4096 bytes available"
        );
    }
}
