//! Error types for the ShardVault restore engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the ShardVault restore engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
#[allow(dead_code)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Unknown ECC scheme name
    #[error("Unknown ECC scheme: {0}")]
    UnknownEccScheme(String),

    /// No ECC scheme covers the given supplier count
    #[error("No ECC scheme for {suppliers} suppliers")]
    UnsupportedSupplierCount { suppliers: usize },

    /// Invalid ECC configuration
    #[error("Invalid ECC configuration: {0}")]
    InvalidEccConfig(String),

    /// Block decode failed
    #[error("Decode failed for block {block_id}: {reason}")]
    DecodeFailed { block_id: String, reason: String },

    /// Not enough fragments present to make any rebuild progress
    #[error("Insufficient fragments: have {available}, need {required}")]
    InsufficientFragments { available: usize, required: usize },

    // =========================================================================
    // Fragment & Block Errors
    // =========================================================================
    /// Fragment id did not parse
    #[error("Malformed fragment id: {0}")]
    MalformedFragmentId(String),

    /// Length-prefix framing of a serialized block was broken
    #[error("Broken block framing: {0}")]
    BlockFraming(String),

    /// Serialized block payload did not deserialize
    #[error("Block deserialization failed: {0}")]
    BlockDeserialize(String),

    /// Block signature did not verify against the signer key
    #[error("Block signature mismatch for {block_id}")]
    SignatureMismatch { block_id: String },

    /// Session-key unwrap or payload decryption failed
    #[error("Block decryption failed: {0}")]
    DecryptFailed(String),

    // =========================================================================
    // Transfer Errors
    // =========================================================================
    /// Request queue refused a fetch
    #[error("Fetch refused for {fragment}: {reason}")]
    FetchRefused { fragment: String, reason: String },

    /// Supplier is not assigned to the customer
    #[error("Unknown supplier: {supplier}")]
    UnknownSupplier { supplier: String },

    /// No suppliers on record for the customer
    #[error("No suppliers on record for {customer}")]
    NoSuppliers { customer: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Restore already in progress for this backup
    #[error("Restore already in progress for backup: {backup_id}")]
    RestoreInProgress { backup_id: String },

    /// Restore worker went away before reporting a verdict
    #[error("Restore worker for {backup_id} terminated without a verdict")]
    WorkerVanished { backup_id: String },

    /// Decode pool is shut down or saturated
    #[error("Decode pool unavailable: {0}")]
    PoolUnavailable(String),
}
