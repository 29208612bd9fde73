//! Error types returned by the dispatch cache.

use std::error;
use std::fmt;

/// Errors that can occur while building or dispatching a shader.
///
/// Programmer-invariant violations (an unknown placement kind turning up at
/// update time, for instance) are not represented here: they are bugs in
/// this crate and panic instead of being propagated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// A shader variable could not be placed in push-constants, a UBO, or a
    /// global uniform slot within the backend's budget.
    PlacementExhausted { variable: String },
    /// The backend failed to create the pass (shader compile/link failure,
    /// out of memory, etc). The signature is now permanently marked as
    /// failed for the lifetime of the `DispatchRoot`.
    BackendFailure { stage: &'static str },
    /// The dispatch target is not a 2D renderable/storable image, or does
    /// not match the accumulator's expectations.
    InvalidTarget { reason: &'static str },
    /// The accumulator's input/output signature does not match what this
    /// entry point expects.
    IncompatibleSignature,
    /// The accumulator passed to a dispatch call previously failed to
    /// build and cannot be dispatched.
    ShaderFailed,
    /// The accumulator was already consumed or is not currently mutable.
    NotMutable,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::PlacementExhausted { variable } => write!(
                f,
                "no placement (push-constant, UBO, or global) available for variable `{}`",
                variable
            ),
            DispatchError::BackendFailure { stage } => {
                write!(f, "backend failed during {}", stage)
            }
            DispatchError::InvalidTarget { reason } => {
                write!(f, "invalid dispatch target: {}", reason)
            }
            DispatchError::IncompatibleSignature => {
                write!(f, "accumulator signature does not match this dispatch entry point")
            }
            DispatchError::ShaderFailed => {
                write!(f, "shader accumulator is marked as failed")
            }
            DispatchError::NotMutable => write!(f, "accumulator is not mutable"),
        }
    }
}

impl error::Error for DispatchError {}

pub type Result<T> = std::result::Result<T, DispatchError>;
