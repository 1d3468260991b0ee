//! Sandboxed, single-steppable dispatch engine for the two-byte stack
//! bytecode defined in `pystep-code`.
//!
//! The engine is generic over a [`ValueHost`], which supplies every value
//! operation (arithmetic, comparison, iteration, calls, containers) behind
//! a trait; the engine itself only moves values between the operand stack,
//! the block stack, and the three name scopes. Every abnormal condition is
//! a typed [`VmError`] returned from [`Machine::step`] — the engine never
//! panics on malformed programs and touches no ambient state.

pub mod error;
pub mod host;
pub mod machine;

pub use error::VmError;
pub use host::{BinaryOp, SequenceKind, UnaryOp, ValueHost};
pub use machine::{Block, Machine, Scopes};
