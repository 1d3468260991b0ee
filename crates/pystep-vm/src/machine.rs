//! Execution frame and fetch-decode-execute dispatch loop.

use indexmap::IndexMap;

use pystep_code::{CodeObject, CompareKind, Opcode};

use crate::error::VmError;
use crate::host::{BinaryOp, SequenceKind, UnaryOp, ValueHost};

/// The three identifier scopes a run resolves names against. Constructed by
/// the caller, owned by the machine for the duration of one run, and
/// returned untouched in ownership by [`Machine::into_scopes`].
#[derive(Debug, Clone, Default)]
pub struct Scopes<V> {
    pub locals: IndexMap<String, V>,
    pub globals: IndexMap<String, V>,
    pub builtins: IndexMap<String, V>,
}

impl<V> Scopes<V> {
    pub fn new() -> Self {
        Self {
            locals: IndexMap::new(),
            globals: IndexMap::new(),
            builtins: IndexMap::new(),
        }
    }
}

/// An active loop or exception-guard region on the block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Cursor value at which the block was opened (the offset just past its
    /// `SETUP_*` instruction).
    pub start: usize,
    /// Byte length of the region.
    pub extent: usize,
}

/// One running program: instruction cursor, operand stack, block stack, and
/// the three scopes, executing against a shared read-only [`CodeObject`].
///
/// The caller drives execution by calling [`step`](Machine::step) until
/// [`finished`](Machine::finished) or a fault; each call is exactly one
/// fetch-decode-execute cycle, which is the natural preemption point for
/// step limits, tracing, or cancellation. The engine owns no threads, does
/// no logging, and never retries a fault.
pub struct Machine<'c, H: ValueHost> {
    host: H,
    code: &'c CodeObject<H::Value>,
    cursor: usize,
    stack: Vec<H::Value>,
    blocks: Vec<Block>,
    scopes: Scopes<H::Value>,
    finished: bool,
    return_value: Option<H::Value>,
}

impl<'c, H: ValueHost> Machine<'c, H> {
    /// Construct a run. The block stack starts with a sentinel block
    /// spanning the whole instruction stream; it is never popped by
    /// ordinary code.
    pub fn new(code: &'c CodeObject<H::Value>, host: H, scopes: Scopes<H::Value>) -> Self {
        Self {
            host,
            code,
            cursor: 0,
            stack: Vec::new(),
            blocks: vec![Block {
                start: 0,
                extent: code.len(),
            }],
            scopes,
            finished: false,
            return_value: None,
        }
    }

    /// Byte offset of the next instruction to fetch.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether a return instruction has terminated the run.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// The value recorded by `RETURN_VALUE`, once finished.
    pub fn return_value(&self) -> Option<&H::Value> {
        self.return_value.as_ref()
    }

    /// Operand-stack snapshot, bottom to top.
    pub fn stack(&self) -> &[H::Value] {
        &self.stack
    }

    /// Block-stack snapshot, sentinel first.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn scopes(&self) -> &Scopes<H::Value> {
        &self.scopes
    }

    /// Tear down the run, returning the scopes to the caller for
    /// inspection of final mutated state.
    pub fn into_scopes(self) -> Scopes<H::Value> {
        self.scopes
    }

    /// Execute exactly one instruction. Returns the opcode and operand byte
    /// executed, for tracing; faults propagate unchanged to the caller.
    pub fn step(&mut self) -> Result<(Opcode, u8), VmError<H::Error>> {
        if self.finished {
            return Err(VmError::Finished);
        }
        let (byte, arg) = self.fetch()?;
        let op = Opcode::from_u8(byte).ok_or(VmError::UnknownOpcode(byte))?;
        self.execute(op, arg)?;
        Ok((op, arg))
    }

    /// Step until the run finishes, a fault occurs, or `max_steps`
    /// instructions have executed. Returns the number of steps taken.
    /// Runaway-loop protection is the caller's concern, which is why the
    /// limit is a parameter rather than engine state.
    pub fn run(&mut self, max_steps: Option<u64>) -> Result<u64, VmError<H::Error>> {
        let mut steps = 0;
        while !self.finished {
            if max_steps.is_some_and(|limit| steps >= limit) {
                break;
            }
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    // === Fetch / seek ===

    fn fetch(&mut self) -> Result<(u8, u8), VmError<H::Error>> {
        let bytes = &self.code.instructions;
        if self.cursor + 2 > bytes.len() {
            return Err(VmError::EndOfStream(self.cursor));
        }
        let pair = (bytes[self.cursor], bytes[self.cursor + 1]);
        self.cursor += 2;
        Ok(pair)
    }

    fn seek_abs(&mut self, target: usize) -> Result<(), VmError<H::Error>> {
        let len = self.code.len();
        if target > len {
            return Err(VmError::SeekOutOfRange { target, len });
        }
        self.cursor = target;
        Ok(())
    }

    /// Relative seek: delta counts from the position just past the
    /// instruction that issued it, which the cursor already sits at.
    fn seek_rel(&mut self, delta: u8) -> Result<(), VmError<H::Error>> {
        self.seek_abs(self.cursor + delta as usize)
    }

    // === Stack / block helpers ===

    fn need(&self, depth: usize, mnemonic: &'static str) -> Result<(), VmError<H::Error>> {
        if self.stack.len() < depth {
            return Err(VmError::StackUnderflow(mnemonic));
        }
        Ok(())
    }

    fn pop(&mut self, mnemonic: &'static str) -> Result<H::Value, VmError<H::Error>> {
        self.stack.pop().ok_or(VmError::StackUnderflow(mnemonic))
    }

    /// Pop `count` values, returned in push order (deepest first), which is
    /// source order for container builds and call order for arguments.
    fn pop_n(
        &mut self,
        count: usize,
        mnemonic: &'static str,
    ) -> Result<Vec<H::Value>, VmError<H::Error>> {
        self.need(count, mnemonic)?;
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn top(&self, mnemonic: &'static str) -> Result<&H::Value, VmError<H::Error>> {
        self.stack.last().ok_or(VmError::StackUnderflow(mnemonic))
    }

    fn pop_block(&mut self) -> Result<Block, VmError<H::Error>> {
        // The sentinel at the bottom is never popped by ordinary code.
        if self.blocks.len() > 1 {
            if let Some(block) = self.blocks.pop() {
                return Ok(block);
            }
        }
        Err(VmError::BlockStackUnderflow)
    }

    // === Table access ===

    fn const_at(&self, index: u8) -> Result<H::Value, VmError<H::Error>> {
        self.code
            .const_at(index)
            .cloned()
            .ok_or(VmError::ConstIndexOutOfRange(index))
    }

    fn name_at(&self, index: u8) -> Result<&'c str, VmError<H::Error>> {
        self.code
            .name_at(index)
            .ok_or(VmError::NameIndexOutOfRange(index))
    }

    fn varname_at(&self, index: u8) -> Result<&'c str, VmError<H::Error>> {
        self.code
            .varname_at(index)
            .ok_or(VmError::LocalIndexOutOfRange(index))
    }

    // === Opcode families ===

    fn unary(&mut self, op: UnaryOp, mnemonic: &'static str) -> Result<(), VmError<H::Error>> {
        let value = self.pop(mnemonic)?;
        let result = self.host.unary(op, value).map_err(VmError::Value)?;
        self.stack.push(result);
        Ok(())
    }

    /// Pop right, pop left, push `left OP right`.
    fn binary(&mut self, op: BinaryOp, mnemonic: &'static str) -> Result<(), VmError<H::Error>> {
        self.need(2, mnemonic)?;
        let right = self.pop(mnemonic)?;
        let left = self.pop(mnemonic)?;
        let result = self.host.binary(op, left, right).map_err(VmError::Value)?;
        self.stack.push(result);
        Ok(())
    }

    /// Same operand order as [`binary`](Self::binary), via the host's
    /// in-place capability.
    fn inplace(&mut self, op: BinaryOp, mnemonic: &'static str) -> Result<(), VmError<H::Error>> {
        self.need(2, mnemonic)?;
        let rhs = self.pop(mnemonic)?;
        let target = self.pop(mnemonic)?;
        let result = self.host.inplace(op, target, rhs).map_err(VmError::Value)?;
        self.stack.push(result);
        Ok(())
    }

    fn truthy_top(&self, mnemonic: &'static str) -> Result<bool, VmError<H::Error>> {
        let top = self.top(mnemonic)?;
        self.host.truthy(top).map_err(VmError::Value)
    }

    fn execute(&mut self, op: Opcode, arg: u8) -> Result<(), VmError<H::Error>> {
        use Opcode::*;
        match op {
            Nop | SetupAnnotations => {}

            // --- Stack shuffles ---
            PopTop => {
                self.pop("POP_TOP")?;
            }
            RotTwo => {
                self.need(2, "ROT_TWO")?;
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            RotThree => {
                // Top moves to third place; second and third move up one.
                self.need(3, "ROT_THREE")?;
                let top = self.pop("ROT_THREE")?;
                let at = self.stack.len() - 2;
                self.stack.insert(at, top);
            }
            DupTop => {
                let top = self.top("DUP_TOP")?.clone();
                self.stack.push(top);
            }
            DupTopTwo => {
                // Duplicate the top pair preserving order.
                self.need(2, "DUP_TOP_TWO")?;
                let len = self.stack.len();
                let second = self.stack[len - 2].clone();
                let top = self.stack[len - 1].clone();
                self.stack.push(second);
                self.stack.push(top);
            }

            // --- Unary ops ---
            UnaryPositive => self.unary(UnaryOp::Positive, "UNARY_POSITIVE")?,
            UnaryNegative => self.unary(UnaryOp::Negative, "UNARY_NEGATIVE")?,
            UnaryNot => self.unary(UnaryOp::Not, "UNARY_NOT")?,
            UnaryInvert => self.unary(UnaryOp::Invert, "UNARY_INVERT")?,

            // --- Binary arithmetic / bitwise ---
            BinaryPower => self.binary(BinaryOp::Power, "BINARY_POWER")?,
            BinaryMultiply => self.binary(BinaryOp::Multiply, "BINARY_MULTIPLY")?,
            BinaryMatrixMultiply => {
                self.binary(BinaryOp::MatrixMultiply, "BINARY_MATRIX_MULTIPLY")?
            }
            BinaryFloorDivide => self.binary(BinaryOp::FloorDivide, "BINARY_FLOOR_DIVIDE")?,
            BinaryTrueDivide => self.binary(BinaryOp::TrueDivide, "BINARY_TRUE_DIVIDE")?,
            BinaryModulo => self.binary(BinaryOp::Modulo, "BINARY_MODULO")?,
            BinaryAdd => self.binary(BinaryOp::Add, "BINARY_ADD")?,
            BinarySubtract => self.binary(BinaryOp::Subtract, "BINARY_SUBTRACT")?,
            BinarySubscr => self.binary(BinaryOp::Subscript, "BINARY_SUBSCR")?,
            BinaryLshift => self.binary(BinaryOp::Lshift, "BINARY_LSHIFT")?,
            BinaryRshift => self.binary(BinaryOp::Rshift, "BINARY_RSHIFT")?,
            BinaryAnd => self.binary(BinaryOp::And, "BINARY_AND")?,
            BinaryXor => self.binary(BinaryOp::Xor, "BINARY_XOR")?,
            BinaryOr => self.binary(BinaryOp::Or, "BINARY_OR")?,

            // --- In-place variants ---
            InplacePower => self.inplace(BinaryOp::Power, "INPLACE_POWER")?,
            InplaceMultiply => self.inplace(BinaryOp::Multiply, "INPLACE_MULTIPLY")?,
            InplaceMatrixMultiply => {
                self.inplace(BinaryOp::MatrixMultiply, "INPLACE_MATRIX_MULTIPLY")?
            }
            InplaceFloorDivide => self.inplace(BinaryOp::FloorDivide, "INPLACE_FLOOR_DIVIDE")?,
            InplaceTrueDivide => self.inplace(BinaryOp::TrueDivide, "INPLACE_TRUE_DIVIDE")?,
            InplaceModulo => self.inplace(BinaryOp::Modulo, "INPLACE_MODULO")?,
            InplaceAdd => self.inplace(BinaryOp::Add, "INPLACE_ADD")?,
            InplaceSubtract => self.inplace(BinaryOp::Subtract, "INPLACE_SUBTRACT")?,
            InplaceLshift => self.inplace(BinaryOp::Lshift, "INPLACE_LSHIFT")?,
            InplaceRshift => self.inplace(BinaryOp::Rshift, "INPLACE_RSHIFT")?,
            InplaceAnd => self.inplace(BinaryOp::And, "INPLACE_AND")?,
            InplaceXor => self.inplace(BinaryOp::Xor, "INPLACE_XOR")?,
            InplaceOr => self.inplace(BinaryOp::Or, "INPLACE_OR")?,

            // --- Subscript store / delete ---
            StoreSubscr => {
                // container[key] = value; key on top, value third.
                self.need(3, "STORE_SUBSCR")?;
                let key = self.pop("STORE_SUBSCR")?;
                let container = self.pop("STORE_SUBSCR")?;
                let value = self.pop("STORE_SUBSCR")?;
                self.host
                    .set_item(&container, key, value)
                    .map_err(VmError::Value)?;
            }
            DeleteSubscr => {
                self.need(2, "DELETE_SUBSCR")?;
                let key = self.pop("DELETE_SUBSCR")?;
                let container = self.pop("DELETE_SUBSCR")?;
                self.host.del_item(&container, key).map_err(VmError::Value)?;
            }

            // --- Comparison ---
            CompareOp => {
                let kind =
                    CompareKind::from_u8(arg).ok_or(VmError::InvalidComparisonKind(arg))?;
                self.need(2, "COMPARE_OP")?;
                let right = self.pop("COMPARE_OP")?;
                let left = self.top("COMPARE_OP")?;
                let outcome = self
                    .host
                    .compare(kind, left, &right)
                    .map_err(VmError::Value)?;
                let result = self.host.from_bool(outcome);
                if let Some(top) = self.stack.last_mut() {
                    *top = result;
                }
            }

            // --- Iteration ---
            GetIter | GetYieldFromIter => {
                let value = self.pop(op.mnemonic())?;
                let iter = self.host.make_iter(value).map_err(VmError::Value)?;
                self.stack.push(iter);
            }
            ForIter => {
                let host = &self.host;
                let iter = self
                    .stack
                    .last_mut()
                    .ok_or(VmError::StackUnderflow("FOR_ITER"))?;
                match host.iter_next(iter).map_err(VmError::Value)? {
                    Some(item) => self.stack.push(item),
                    None => {
                        let _ = self.stack.pop();
                        self.seek_rel(arg)?;
                    }
                }
            }

            // --- Loop / exception blocks ---
            SetupLoop | SetupExcept => {
                self.blocks.push(Block {
                    start: self.cursor,
                    extent: arg as usize,
                });
            }
            PopBlock | PopExcept => {
                self.pop_block()?;
            }
            BreakLoop => {
                let block = self.pop_block()?;
                self.seek_abs(block.start + block.extent)?;
            }
            ContinueLoop => {
                // Target must address a FOR_ITER; the block stack is left alone.
                self.seek_abs(arg as usize)?;
            }

            // --- Jumps ---
            JumpForward => self.seek_rel(arg)?,
            JumpAbsolute => self.seek_abs(arg as usize)?,
            PopJumpIfTrue => {
                let value = self.pop("POP_JUMP_IF_TRUE")?;
                if self.host.truthy(&value).map_err(VmError::Value)? {
                    self.seek_abs(arg as usize)?;
                }
            }
            PopJumpIfFalse => {
                let value = self.pop("POP_JUMP_IF_FALSE")?;
                if !self.host.truthy(&value).map_err(VmError::Value)? {
                    self.seek_abs(arg as usize)?;
                }
            }
            JumpIfTrueOrPop => {
                if self.truthy_top("JUMP_IF_TRUE_OR_POP")? {
                    self.seek_abs(arg as usize)?;
                } else {
                    let _ = self.stack.pop();
                }
            }
            JumpIfFalseOrPop => {
                if !self.truthy_top("JUMP_IF_FALSE_OR_POP")? {
                    self.seek_abs(arg as usize)?;
                } else {
                    let _ = self.stack.pop();
                }
            }

            // --- Constants and names ---
            LoadConst => {
                let value = self.const_at(arg)?;
                self.stack.push(value);
            }
            LoadName => {
                // Locals, then builtins. Globals are intentionally not
                // consulted by this opcode.
                let name = self.name_at(arg)?;
                let value = self
                    .scopes
                    .locals
                    .get(name)
                    .or_else(|| self.scopes.builtins.get(name))
                    .cloned()
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
                self.stack.push(value);
            }
            StoreName => {
                let name = self.name_at(arg)?;
                let value = self.pop("STORE_NAME")?;
                self.scopes.locals.insert(name.to_owned(), value);
            }
            DeleteName => {
                let name = self.name_at(arg)?;
                self.scopes
                    .locals
                    .shift_remove(name)
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
            }
            LoadGlobal => {
                let name = self.name_at(arg)?;
                let value = self
                    .scopes
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
                self.stack.push(value);
            }
            StoreGlobal => {
                let name = self.name_at(arg)?;
                let value = self.pop("STORE_GLOBAL")?;
                self.scopes.globals.insert(name.to_owned(), value);
            }
            DeleteGlobal => {
                let name = self.name_at(arg)?;
                self.scopes
                    .globals
                    .shift_remove(name)
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
            }
            LoadFast => {
                let name = self.varname_at(arg)?;
                let value = self
                    .scopes
                    .locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
                self.stack.push(value);
            }
            StoreFast => {
                let name = self.varname_at(arg)?;
                let value = self.pop("STORE_FAST")?;
                self.scopes.locals.insert(name.to_owned(), value);
            }
            DeleteFast => {
                let name = self.varname_at(arg)?;
                self.scopes
                    .locals
                    .shift_remove(name)
                    .ok_or_else(|| VmError::NameNotFound(name.to_owned()))?;
            }

            // --- Attributes ---
            LoadAttr => {
                let name = self.name_at(arg)?;
                let object = self.top("LOAD_ATTR")?;
                let value = self.host.get_attr(object, name).map_err(VmError::Value)?;
                if let Some(top) = self.stack.last_mut() {
                    *top = value;
                }
            }
            StoreAttr => {
                self.need(2, "STORE_ATTR")?;
                let name = self.name_at(arg)?;
                let object = self.pop("STORE_ATTR")?;
                let value = self.pop("STORE_ATTR")?;
                self.host
                    .set_attr(&object, name, value)
                    .map_err(VmError::Value)?;
            }
            DeleteAttr => {
                let name = self.name_at(arg)?;
                let object = self.pop("DELETE_ATTR")?;
                self.host.del_attr(&object, name).map_err(VmError::Value)?;
            }

            // --- Unpack (simple case) ---
            UnpackSequence => {
                let value = self.pop("UNPACK_SEQUENCE")?;
                let mut iter = self.host.make_iter(value).map_err(VmError::Value)?;
                let host = &self.host;
                while let Some(item) = host.iter_next(&mut iter).map_err(VmError::Value)? {
                    self.stack.push(item);
                }
            }

            // --- Container construction ---
            BuildTuple => {
                let items = self.pop_n(arg as usize, "BUILD_TUPLE")?;
                let value = self
                    .host
                    .build(SequenceKind::Tuple, items)
                    .map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildList => {
                let items = self.pop_n(arg as usize, "BUILD_LIST")?;
                let value = self
                    .host
                    .build(SequenceKind::List, items)
                    .map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildSet => {
                let items = self.pop_n(arg as usize, "BUILD_SET")?;
                let value = self
                    .host
                    .build(SequenceKind::Set, items)
                    .map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildMap => {
                // Each pair is pushed key first, value second; pairs keep
                // their first-pushed to last-pushed order in the result.
                let count = arg as usize;
                let flat = self.pop_n(2 * count, "BUILD_MAP")?;
                let mut pairs = Vec::with_capacity(count);
                let mut items = flat.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    pairs.push((key, value));
                }
                let value = self.host.build_map(pairs).map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildTupleUnpack | BuildListUnpack => {
                // Sequence sources concatenate in push order.
                let kind = if op == BuildTupleUnpack {
                    SequenceKind::Tuple
                } else {
                    SequenceKind::List
                };
                let sources = self.pop_n(arg as usize, op.mnemonic())?;
                let value = self.host.merge(kind, sources).map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildSetUnpack => {
                let mut sources = Vec::with_capacity(arg as usize);
                for _ in 0..arg {
                    sources.push(self.pop("BUILD_SET_UNPACK")?);
                }
                let value = self
                    .host
                    .merge(SequenceKind::Set, sources)
                    .map_err(VmError::Value)?;
                self.stack.push(value);
            }
            BuildMapUnpack => {
                let mut sources = Vec::with_capacity(arg as usize);
                for _ in 0..arg {
                    sources.push(self.pop("BUILD_MAP_UNPACK")?);
                }
                let value = self.host.merge_maps(sources).map_err(VmError::Value)?;
                self.stack.push(value);
            }

            // --- Slices ---
            BuildSlice => match arg {
                2 => {
                    self.need(2, "BUILD_SLICE")?;
                    let stop = self.pop("BUILD_SLICE")?;
                    let start = self.pop("BUILD_SLICE")?;
                    let value = self
                        .host
                        .make_slice(start, stop, None)
                        .map_err(VmError::Value)?;
                    self.stack.push(value);
                }
                3 => {
                    self.need(3, "BUILD_SLICE")?;
                    let step = self.pop("BUILD_SLICE")?;
                    let stop = self.pop("BUILD_SLICE")?;
                    let start = self.pop("BUILD_SLICE")?;
                    let value = self
                        .host
                        .make_slice(start, stop, Some(step))
                        .map_err(VmError::Value)?;
                    self.stack.push(value);
                }
                other => return Err(VmError::InvalidSliceArity(other)),
            },

            // --- Calls ---
            CallFunction => {
                // pop_n restores call order from push order.
                self.need(arg as usize + 1, "CALL_FUNCTION")?;
                let args = self.pop_n(arg as usize, "CALL_FUNCTION")?;
                let callee = self.pop("CALL_FUNCTION")?;
                let result = self
                    .host
                    .call(callee, args, Vec::new())
                    .map_err(VmError::Value)?;
                self.stack.push(result);
            }
            CallFunctionKw => {
                let names_seq = self.pop("CALL_FUNCTION_KW")?;
                let mut names = self.host.make_iter(names_seq).map_err(VmError::Value)?;
                let mut kwargs = Vec::new();
                loop {
                    let next = self.host.iter_next(&mut names).map_err(VmError::Value)?;
                    let Some(name) = next else { break };
                    let value = self.pop("CALL_FUNCTION_KW")?;
                    kwargs.push((name, value));
                }
                let positional = (arg as usize)
                    .checked_sub(kwargs.len())
                    .ok_or(VmError::StackUnderflow("CALL_FUNCTION_KW"))?;
                let args = self.pop_n(positional, "CALL_FUNCTION_KW")?;
                let callee = self.pop("CALL_FUNCTION_KW")?;
                let result = self.host.call(callee, args, kwargs).map_err(VmError::Value)?;
                self.stack.push(result);
            }
            CallFunctionEx => {
                let kwargs = if arg & 0x01 != 0 {
                    Some(self.pop("CALL_FUNCTION_EX")?)
                } else {
                    None
                };
                let args = self.pop("CALL_FUNCTION_EX")?;
                let callee = self.pop("CALL_FUNCTION_EX")?;
                let result = self
                    .host
                    .call_ex(callee, args, kwargs)
                    .map_err(VmError::Value)?;
                self.stack.push(result);
            }

            // --- Return / raise ---
            ReturnValue => {
                let value = self.top("RETURN_VALUE")?.clone();
                self.finished = true;
                self.return_value = Some(value);
            }
            RaiseVarargs => match arg {
                0 => {
                    // Bare re-raise needs exception state this machine
                    // does not model.
                    return Err(VmError::UnsupportedOpcode("RAISE_VARARGS"));
                }
                1 => {
                    let value = self.pop("RAISE_VARARGS")?;
                    return Err(VmError::Raised {
                        value: self.host.describe(&value),
                        cause: None,
                    });
                }
                2 => {
                    self.need(2, "RAISE_VARARGS")?;
                    let cause = self.pop("RAISE_VARARGS")?;
                    let value = self.pop("RAISE_VARARGS")?;
                    return Err(VmError::Raised {
                        value: self.host.describe(&value),
                        cause: Some(self.host.describe(&cause)),
                    });
                }
                other => return Err(VmError::InvalidRaiseArity(other)),
            },

            // --- Recognized but intentionally unimplemented ---
            GetAiter | GetAnext | BeforeAsyncWith | SetupAsyncWith | GetAwaitable | YieldValue
            | YieldFrom | SetAdd | ListAppend | MapAdd | SetupWith | WithCleanupStart
            | WithCleanupFinish | ImportStar | ImportName | ImportFrom | SetupFinally
            | EndFinally | UnpackEx | BuildConstKeyMap | BuildString | BuildMapUnpackWithCall
            | BuildTupleUnpackWithCall | MakeFunction | LoadClosure | LoadDeref | StoreDeref
            | DeleteDeref | LoadClassderef | PrintExpr | LoadBuildClass | ExtendedArg
            | FormatValue => {
                return Err(VmError::UnsupportedOpcode(op.mnemonic()));
            }
        }
        Ok(())
    }
}
