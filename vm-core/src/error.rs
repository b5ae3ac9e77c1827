//! The runtime fault taxonomy (§7).
//!
//! Every variant here is raised by a well-defined primitive in
//! [`crate::memory`], [`crate::call`], or [`crate::dispatch`] and caught
//! exactly once, at the top of [`crate::interpreter::Interpreter::run`].

/// A fault raised while executing an already-loaded program.
///
/// Distinct from [`c0vm_asm::InvalidFile`], which is raised only while
/// loading or validating a program image, never while running one.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// A push would exceed the `2^24`-slot stack capacity.
    #[error("stack overflow")]
    StackOverflow,

    /// An allocation would exceed the `2^25` heap address ceiling.
    #[error("heap overflow")]
    HeapOverflow,

    /// An address fell outside the initialized stack or any heap record,
    /// straddled a record boundary, or a pop reached past the current
    /// frame's base pointer.
    #[error("invalid memory access: {reason}")]
    InvalidMemoryAccess {
        /// What made the access invalid.
        reason: String,
    },

    /// An opcode decoded to a value with no execution semantics.
    #[error("invalid instruction")]
    InvalidInstruction,

    /// Integer division or modulus by zero.
    #[error("divide integer by zero")]
    DivideByZero,

    /// A jump offset or call index fell out of range, a return was issued
    /// from the root context, or level arithmetic failed during a call.
    #[error("invalid control transfer")]
    InvalidControlTransfer,

    /// A scan instruction failed to parse or read its token.
    #[error("I/O error: {reason}")]
    IOError {
        /// What went wrong reading or parsing the token.
        reason: String,
    },
}
