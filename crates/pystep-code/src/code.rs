//! Compiled-program artifacts.

/// An immutable compiled program: raw instruction bytes plus the constant
/// and identifier tables the instructions index into. Produced by a
/// front-end (or by [`crate::asm::Asm`] in tests and drivers) and shared
/// read-only with the dispatch engine for the lifetime of one run.
///
/// Generic over the host value type `V`; the code artifact treats
/// constants as opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject<V> {
    /// Instruction stream, consumed two bytes at a time: opcode byte, then
    /// a single unsigned operand byte. Multi-byte operands are not part of
    /// this format.
    pub instructions: Vec<u8>,
    /// Constants, indexed by the operand of `LOAD_CONST`.
    pub consts: Vec<V>,
    /// Identifier table for name/global/attribute opcodes.
    pub names: Vec<String>,
    /// Identifier table for the `*_FAST` local-variable opcodes.
    pub varnames: Vec<String>,
}

impl<V> CodeObject<V> {
    /// An empty artifact. Running it faults immediately with end-of-stream;
    /// a well-formed program ends with an explicit return instruction.
    pub fn empty() -> Self {
        Self {
            instructions: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
        }
    }

    /// Length of the instruction stream in bytes.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the instruction stream is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn const_at(&self, index: u8) -> Option<&V> {
        self.consts.get(index as usize)
    }

    pub fn name_at(&self, index: u8) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn varname_at(&self, index: u8) -> Option<&str> {
        self.varnames.get(index as usize).map(String::as_str)
    }
}
