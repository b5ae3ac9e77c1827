//! Errors raised while building or decoding a program image.

/// A malformed program, caught either while validating an in-memory
/// [`crate::program::Program`] or while decoding one from its binary or
/// textual encoding.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("invalid file: {reason}")]
pub struct InvalidFile {
    /// A human-readable description of what was wrong.
    pub reason: String,
}

impl InvalidFile {
    /// Build an `InvalidFile` from any `Display`-able reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
