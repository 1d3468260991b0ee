//! Bytecode builder for constructing [`CodeObject`]s without hand-computing
//! byte offsets or table indices.
//!
//! Jump targets are expressed as labels and back-patched by [`Asm::finish`];
//! relative jumps encode the delta from the offset just past the jump
//! instruction, matching how the dispatch engine seeks.

use thiserror::Error;

use crate::code::CodeObject;
use crate::opcode::{CompareKind, Opcode};

/// A control-flow target that may be bound before or after it is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum FixupMode {
    Absolute,
    Relative,
}

/// A bytecode construction error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("label was referenced but never bound")]
    UnboundLabel,

    #[error("operand {0} does not fit in the single operand byte")]
    OperandOverflow(usize),

    #[error("{0} table exceeds 256 entries")]
    TableOverflow(&'static str),

    #[error("relative jump at offset {site} targets offset {target}, which is not ahead of it")]
    BackwardRelativeJump { site: usize, target: usize },
}

/// Incremental builder for a [`CodeObject`].
#[derive(Debug)]
pub struct Asm<V> {
    code: Vec<u8>,
    consts: Vec<V>,
    names: Vec<String>,
    varnames: Vec<String>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label, FixupMode)>,
}

impl<V: PartialEq> Asm<V> {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Current byte offset (the offset of the next emitted instruction).
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emit an instruction with an ignored operand byte.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.op_arg(op, 0)
    }

    /// Emit an instruction with an explicit operand byte.
    pub fn op_arg(&mut self, op: Opcode, arg: u8) -> &mut Self {
        self.code.push(op as u8);
        self.code.push(arg);
        self
    }

    /// Intern a constant, returning its table index.
    pub fn const_(&mut self, value: V) -> Result<u8, AsmError> {
        if let Some(i) = self.consts.iter().position(|c| *c == value) {
            return Ok(i as u8);
        }
        let i = self.consts.len();
        if i > u8::MAX as usize {
            return Err(AsmError::TableOverflow("constants"));
        }
        self.consts.push(value);
        Ok(i as u8)
    }

    /// Intern an identifier in the names table.
    pub fn name(&mut self, name: &str) -> Result<u8, AsmError> {
        Self::intern(&mut self.names, name, "names")
    }

    /// Intern an identifier in the local-variable-names table.
    pub fn varname(&mut self, name: &str) -> Result<u8, AsmError> {
        Self::intern(&mut self.varnames, name, "varnames")
    }

    fn intern(table: &mut Vec<String>, name: &str, what: &'static str) -> Result<u8, AsmError> {
        if let Some(i) = table.iter().position(|n| n == name) {
            return Ok(i as u8);
        }
        let i = table.len();
        if i > u8::MAX as usize {
            return Err(AsmError::TableOverflow(what));
        }
        table.push(name.to_owned());
        Ok(i as u8)
    }

    pub fn load_const(&mut self, value: V) -> Result<&mut Self, AsmError> {
        let i = self.const_(value)?;
        Ok(self.op_arg(Opcode::LoadConst, i))
    }

    pub fn load_name(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.name(name)?;
        Ok(self.op_arg(Opcode::LoadName, i))
    }

    pub fn store_name(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.name(name)?;
        Ok(self.op_arg(Opcode::StoreName, i))
    }

    pub fn load_global(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.name(name)?;
        Ok(self.op_arg(Opcode::LoadGlobal, i))
    }

    pub fn store_global(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.name(name)?;
        Ok(self.op_arg(Opcode::StoreGlobal, i))
    }

    pub fn load_attr(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.name(name)?;
        Ok(self.op_arg(Opcode::LoadAttr, i))
    }

    pub fn load_fast(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.varname(name)?;
        Ok(self.op_arg(Opcode::LoadFast, i))
    }

    pub fn store_fast(&mut self, name: &str) -> Result<&mut Self, AsmError> {
        let i = self.varname(name)?;
        Ok(self.op_arg(Opcode::StoreFast, i))
    }

    pub fn compare_op(&mut self, kind: CompareKind) -> &mut Self {
        self.op_arg(Opcode::CompareOp, kind as u8)
    }

    /// Allocate a fresh, unbound label.
    pub fn label(&mut self) -> Label {
        let l = Label(self.labels.len());
        self.labels.push(None);
        l
    }

    /// Bind a label to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emit an absolute-target jump (or `CONTINUE_LOOP`) to `label`. The
    /// operand byte is patched to the label's offset at `finish`.
    pub fn jump_abs(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.code.len(), label, FixupMode::Absolute));
        self.op_arg(op, 0)
    }

    /// Emit a relative-target instruction (`JUMP_FORWARD`, `FOR_ITER`,
    /// `SETUP_LOOP`, `SETUP_EXCEPT`) whose operand is the forward delta
    /// from the offset just past this instruction to `label`.
    pub fn jump_rel(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.code.len(), label, FixupMode::Relative));
        self.op_arg(op, 0)
    }

    /// Resolve all fixups and produce the finished artifact.
    pub fn finish(mut self) -> Result<CodeObject<V>, AsmError> {
        for (site, label, mode) in self.fixups.drain(..) {
            let target = self.labels[label.0].ok_or(AsmError::UnboundLabel)?;
            let operand = match mode {
                FixupMode::Absolute => target,
                FixupMode::Relative => {
                    let base = site + 2;
                    target
                        .checked_sub(base)
                        .ok_or(AsmError::BackwardRelativeJump { site, target })?
                }
            };
            if operand > u8::MAX as usize {
                return Err(AsmError::OperandOverflow(operand));
            }
            self.code[site + 1] = operand as u8;
        }
        Ok(CodeObject {
            instructions: self.code,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
        })
    }
}

impl<V: PartialEq> Default for Asm<V> {
    fn default() -> Self {
        Self::new()
    }
}
