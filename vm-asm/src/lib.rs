//! Opcode catalogue, program image, binary codec, and textual
//! assembler/disassembler for the C0VM stack machine — the value/opcode
//! model (§4.A), program image (§4.B), binary file format (§4.C), and text
//! listing format (§6) that [`c0vm_core`](https://docs.rs/c0vm-core)
//! executes.
//!
//! This crate has no notion of execution: it only describes *what a
//! program is*, not what running one does.

pub mod codec;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod program;
pub mod text;
pub mod value;

pub use error::InvalidFile;
pub use instruction::Instruction;
pub use opcode::{Opcode, ParamProfile};
pub use program::{Function, Program};
pub use value::{Addr, Constant, Slot, HEAP_BASE, HEAP_LIMIT, STACK_LIMIT};
