//! Error types for the store.

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the store
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's meta page does not carry the expected magic number
    #[error("invalid database file: magic mismatch (found {found:#010x})")]
    BadMagic { found: u32 },

    /// Insertion of a key that already resides in the tree
    #[error("key already exists")]
    KeyExists,

    /// Lookup of a key that is not in the tree
    #[error("key not found")]
    KeyNotFound,

    /// A node cannot hold one more entry even after compaction.
    ///
    /// Internal sentinel that triggers a split; the insert path always
    /// catches it before it can reach the public API.
    #[error("node is full")]
    NodeFull,

    /// Key exceeds maximum allowed size
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value exceeds maximum allowed size
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Structural inconsistency detected while decoding a page.
    ///
    /// The file is not trustworthy past this point; callers treat the
    /// handle as unusable.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Invalid operation for the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}
