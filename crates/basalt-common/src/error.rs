//! Error types for basalt.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using BasaltError.
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Errors that can occur in basalt operations.
#[derive(Debug, Error)]
pub enum BasaltError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Buffer manager errors
    #[error("no more free pages")]
    BufferPoolFull,

    #[error("Lock conflict on page {page_id}: cannot grant {requested}")]
    LockConflict { page_id: PageId, requested: String },

    #[error("Block {page_id} is still locked")]
    BlockLocked { page_id: PageId },

    #[error("Page not resident: {page_id}")]
    PageNotResident { page_id: PageId },

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // Index errors
    #[error("Invalid index page {page_id}: {reason}")]
    InvalidPage { page_id: PageId, reason: String },

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Duplicate tuple id {tid} for key")]
    DuplicateTid { tid: String },

    #[error("Index entry full: at most {max} tuple ids per key")]
    EntryFull { max: usize },

    #[error("Unique index cannot remove {requested} tuple ids for one key")]
    UniqueViolation { requested: usize },

    #[error("Key not found")]
    KeyNotFound,

    #[error("Could not remove all tuple ids: {remaining} remaining")]
    NotAllRemoved { remaining: usize },

    #[error("Pin stack is invalid: depth {depth}")]
    PinStackInvalid { depth: usize },

    // Type errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
