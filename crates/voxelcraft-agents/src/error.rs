//! Error types for the voxelcraft-agents crate.
//!
//! Inventory arithmetic, request parsing, and law parameter validation
//! return [`AgentError`] instead of panicking. The engine maps each variant
//! onto a wire [`ErrorCode`] with [`AgentError::code`].

use voxelcraft_types::ErrorCode;

/// Errors raised by agent-side state operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Attempted to remove more of an item than is held.
    #[error("insufficient {item}: wanted {requested}, have {available}")]
    InsufficientItem {
        /// Item id.
        item: String,
        /// Units requested.
        requested: u32,
        /// Units held.
        available: u32,
    },

    /// A count would overflow.
    #[error("arithmetic overflow: {context}")]
    Overflow {
        /// What was being computed.
        context: String,
    },

    /// An item list was empty or contained a non-positive count.
    #[error("invalid item list: {reason}")]
    InvalidItems {
        /// Why the list was rejected.
        reason: String,
    },

    /// A law parameter was missing or out of range.
    #[error("invalid law parameter {name}: {reason}")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The law template id is not known.
    #[error("unknown law template: {0}")]
    UnknownTemplate(String),
}

impl AgentError {
    /// Wire code for this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InsufficientItem { .. } => ErrorCode::NoResource,
            Self::Overflow { .. } => ErrorCode::Internal,
            Self::InvalidItems { .. } | Self::InvalidParam { .. } => ErrorCode::BadRequest,
            Self::UnknownTemplate(_) => ErrorCode::InvalidTarget,
        }
    }
}
