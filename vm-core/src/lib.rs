//! Interpreter core for the C0VM stack machine: the memory subsystem
//! (§4.D), the call subsystem (§4.E), per-opcode dispatch (§4.F), and the
//! run loop that wires a [`c0vm_asm::Program`] into a running
//! [`Interpreter`].
//!
//! This crate has no notion of files or text: it only knows how to run an
//! already-validated [`c0vm_asm::Program`].

pub mod call;
pub mod dispatch;
pub mod error;
pub mod interpreter;
pub mod memory;

pub use call::{CallStack, Context};
pub use error::RuntimeError;
pub use interpreter::{Fault, Interpreter, TraceFrame};
pub use memory::Memory;
