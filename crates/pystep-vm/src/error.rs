//! Fault taxonomy for the dispatch engine.

use std::error::Error;

use thiserror::Error;

/// A fault raised while executing one instruction. Every fault is fatal to
/// the current run; the engine never retries internally and never logs.
/// Handlers validate stack depth, operand ranges, and name presence before
/// mutating any scope, so a fault always leaves the frame consistent with
/// the last fully completed instruction.
///
/// Generic over the host value system's error type, which the engine
/// surfaces unchanged as [`VmError::Value`].
#[derive(Debug, Error)]
pub enum VmError<E: Error> {
    /// Fetch found fewer than two bytes remaining and no return
    /// instruction was reached.
    #[error("unexpected end of instruction stream at offset {0}")]
    EndOfStream(usize),

    /// The opcode byte has no defined mnemonic.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// The mnemonic is recognized but intentionally unimplemented.
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(&'static str),

    /// An opcode required more operands than the stack held. Names the
    /// faulting mnemonic.
    #[error("operand stack underflow in {0}")]
    StackUnderflow(&'static str),

    /// A block pop was attempted with only the sentinel block remaining.
    #[error("block stack underflow")]
    BlockStackUnderflow,

    /// A load or delete referenced an identifier absent from the scopes
    /// that opcode consults.
    #[error("name `{0}` is not defined")]
    NameNotFound(String),

    /// `COMPARE_OP` operand byte outside the eight comparison kinds.
    #[error("invalid comparison kind {0}")]
    InvalidComparisonKind(u8),

    /// `BUILD_SLICE` operand other than 2 or 3.
    #[error("slice arity must be 2 or 3, got {0}")]
    InvalidSliceArity(u8),

    /// `RAISE_VARARGS` operand above 2.
    #[error("invalid raise arity {0}")]
    InvalidRaiseArity(u8),

    /// A computed seek target falls outside the instruction stream.
    #[error("seek target {target} outside instruction stream of {len} bytes")]
    SeekOutOfRange { target: usize, len: usize },

    /// `LOAD_CONST` operand outside the constants table.
    #[error("constant index {0} out of range")]
    ConstIndexOutOfRange(u8),

    /// A name-table operand outside the names table.
    #[error("name index {0} out of range")]
    NameIndexOutOfRange(u8),

    /// A `*_FAST` operand outside the local-variable-names table.
    #[error("local variable index {0} out of range")]
    LocalIndexOutOfRange(u8),

    /// `RAISE_VARARGS` propagated a value as a raised error. Carries the
    /// host's description of the value (and cause, for arity 2).
    #[error("raised {value}{}", .cause.as_deref().map(|c| format!(" from {c}")).unwrap_or_default())]
    Raised {
        value: String,
        cause: Option<String>,
    },

    /// The machine was stepped after it finished. Caller misuse, not a
    /// program fault.
    #[error("machine already finished")]
    Finished,

    /// The host value system rejected an operation. Surfaced unchanged.
    #[error("value operation failed: {0}")]
    Value(#[source] E),
}
