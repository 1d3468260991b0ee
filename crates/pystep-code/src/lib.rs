//! Instruction table, code artifacts, and bytecode tooling for pystep.
//!
//! This crate is pure data and tooling: the opcode table, the immutable
//! [`CodeObject`] the dispatch engine consumes, a label-based assembler for
//! building artifacts in tests and drivers, and a disassembler. Execution
//! lives in `pystep-vm`.

pub mod asm;
pub mod code;
pub mod dis;
pub mod opcode;

pub use asm::{Asm, AsmError, Label};
pub use code::CodeObject;
pub use dis::disassemble;
pub use opcode::{CompareKind, Opcode, OperandKind, HAVE_ARGUMENT};
