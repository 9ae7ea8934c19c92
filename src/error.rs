use thiserror::Error;

/// Failures of the introspection core.
///
/// Formatting operations propagate these unchanged to their caller. Only the
/// command boundary turns [`InspectError::InvalidArgument`] into a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    /// A named type is unknown to the target's type information.
    #[error("Unknown type or member '{name}'")]
    TypeResolution { name: String },

    /// An expression could not be resolved to a value in the current context.
    #[error("Cannot evaluate '{expression}': {reason}")]
    Evaluation { expression: String, reason: String },

    /// A read touched memory outside the mapped target image.
    #[error("Cannot access memory at address 0x{address:x} ({len} bytes)")]
    OutOfBoundsRead { address: u64, len: u64 },

    /// Malformed interactive command input.
    #[error("Invalid argument {position} ({which}): {reason}")]
    InvalidArgument {
        position: usize,
        which: &'static str,
        reason: String,
    },
}

impl InspectError {
    pub fn type_resolution(name: impl Into<String>) -> Self {
        Self::TypeResolution { name: name.into() }
    }

    pub fn evaluation(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn out_of_bounds(address: u64, len: u64) -> Self {
        Self::OutOfBoundsRead { address, len }
    }
}

pub type InspectResult<T> = std::result::Result<T, InspectError>;
