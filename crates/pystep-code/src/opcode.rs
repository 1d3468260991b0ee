//! Instruction table for the pystep VM.
//!
//! One variant per mnemonic of the version-pinned instruction set, carrying
//! the concrete opcode numbering of the bytecode this machine executes.
//! Every instruction is encoded as two bytes: the opcode byte followed by a
//! single unsigned operand byte. Opcodes below [`HAVE_ARGUMENT`] consume the
//! operand byte but ignore it.

/// Opcode numbers at or above this value carry a meaningful operand byte.
///
/// This is a marker constant, not an opcode (its value collides with
/// `STORE_NAME`).
pub const HAVE_ARGUMENT: u8 = 90;

macro_rules! opcodes {
    ($($variant:ident = $num:literal, $mnemonic:literal;)*) => {
        /// A decoded opcode.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant = $num,)*
        }

        impl Opcode {
            /// Decode an opcode byte. `None` means the byte has no defined
            /// mnemonic at all (as opposed to a recognized-but-unsupported
            /// instruction).
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($num => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// The canonical mnemonic, as printed by disassemblers.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    PopTop = 1, "POP_TOP";
    RotTwo = 2, "ROT_TWO";
    RotThree = 3, "ROT_THREE";
    DupTop = 4, "DUP_TOP";
    DupTopTwo = 5, "DUP_TOP_TWO";
    Nop = 9, "NOP";
    UnaryPositive = 10, "UNARY_POSITIVE";
    UnaryNegative = 11, "UNARY_NEGATIVE";
    UnaryNot = 12, "UNARY_NOT";
    UnaryInvert = 15, "UNARY_INVERT";
    BinaryMatrixMultiply = 16, "BINARY_MATRIX_MULTIPLY";
    InplaceMatrixMultiply = 17, "INPLACE_MATRIX_MULTIPLY";
    BinaryPower = 19, "BINARY_POWER";
    BinaryMultiply = 20, "BINARY_MULTIPLY";
    BinaryModulo = 22, "BINARY_MODULO";
    BinaryAdd = 23, "BINARY_ADD";
    BinarySubtract = 24, "BINARY_SUBTRACT";
    BinarySubscr = 25, "BINARY_SUBSCR";
    BinaryFloorDivide = 26, "BINARY_FLOOR_DIVIDE";
    BinaryTrueDivide = 27, "BINARY_TRUE_DIVIDE";
    InplaceFloorDivide = 28, "INPLACE_FLOOR_DIVIDE";
    InplaceTrueDivide = 29, "INPLACE_TRUE_DIVIDE";
    GetAiter = 50, "GET_AITER";
    GetAnext = 51, "GET_ANEXT";
    BeforeAsyncWith = 52, "BEFORE_ASYNC_WITH";
    InplaceAdd = 55, "INPLACE_ADD";
    InplaceSubtract = 56, "INPLACE_SUBTRACT";
    InplaceMultiply = 57, "INPLACE_MULTIPLY";
    InplaceModulo = 59, "INPLACE_MODULO";
    StoreSubscr = 60, "STORE_SUBSCR";
    DeleteSubscr = 61, "DELETE_SUBSCR";
    BinaryLshift = 62, "BINARY_LSHIFT";
    BinaryRshift = 63, "BINARY_RSHIFT";
    BinaryAnd = 64, "BINARY_AND";
    BinaryXor = 65, "BINARY_XOR";
    BinaryOr = 66, "BINARY_OR";
    InplacePower = 67, "INPLACE_POWER";
    GetIter = 68, "GET_ITER";
    GetYieldFromIter = 69, "GET_YIELD_FROM_ITER";
    PrintExpr = 70, "PRINT_EXPR";
    LoadBuildClass = 71, "LOAD_BUILD_CLASS";
    YieldFrom = 72, "YIELD_FROM";
    GetAwaitable = 73, "GET_AWAITABLE";
    InplaceLshift = 75, "INPLACE_LSHIFT";
    InplaceRshift = 76, "INPLACE_RSHIFT";
    InplaceAnd = 77, "INPLACE_AND";
    InplaceXor = 78, "INPLACE_XOR";
    InplaceOr = 79, "INPLACE_OR";
    BreakLoop = 80, "BREAK_LOOP";
    WithCleanupStart = 81, "WITH_CLEANUP_START";
    WithCleanupFinish = 82, "WITH_CLEANUP_FINISH";
    ReturnValue = 83, "RETURN_VALUE";
    ImportStar = 84, "IMPORT_STAR";
    SetupAnnotations = 85, "SETUP_ANNOTATIONS";
    YieldValue = 86, "YIELD_VALUE";
    PopBlock = 87, "POP_BLOCK";
    EndFinally = 88, "END_FINALLY";
    PopExcept = 89, "POP_EXCEPT";
    StoreName = 90, "STORE_NAME";
    DeleteName = 91, "DELETE_NAME";
    UnpackSequence = 92, "UNPACK_SEQUENCE";
    ForIter = 93, "FOR_ITER";
    UnpackEx = 94, "UNPACK_EX";
    StoreAttr = 95, "STORE_ATTR";
    DeleteAttr = 96, "DELETE_ATTR";
    StoreGlobal = 97, "STORE_GLOBAL";
    DeleteGlobal = 98, "DELETE_GLOBAL";
    LoadConst = 100, "LOAD_CONST";
    LoadName = 101, "LOAD_NAME";
    BuildTuple = 102, "BUILD_TUPLE";
    BuildList = 103, "BUILD_LIST";
    BuildSet = 104, "BUILD_SET";
    BuildMap = 105, "BUILD_MAP";
    LoadAttr = 106, "LOAD_ATTR";
    CompareOp = 107, "COMPARE_OP";
    ImportName = 108, "IMPORT_NAME";
    ImportFrom = 109, "IMPORT_FROM";
    JumpForward = 110, "JUMP_FORWARD";
    JumpIfFalseOrPop = 111, "JUMP_IF_FALSE_OR_POP";
    JumpIfTrueOrPop = 112, "JUMP_IF_TRUE_OR_POP";
    JumpAbsolute = 113, "JUMP_ABSOLUTE";
    PopJumpIfFalse = 114, "POP_JUMP_IF_FALSE";
    PopJumpIfTrue = 115, "POP_JUMP_IF_TRUE";
    LoadGlobal = 116, "LOAD_GLOBAL";
    ContinueLoop = 119, "CONTINUE_LOOP";
    SetupLoop = 120, "SETUP_LOOP";
    SetupExcept = 121, "SETUP_EXCEPT";
    SetupFinally = 122, "SETUP_FINALLY";
    LoadFast = 124, "LOAD_FAST";
    StoreFast = 125, "STORE_FAST";
    DeleteFast = 126, "DELETE_FAST";
    RaiseVarargs = 130, "RAISE_VARARGS";
    CallFunction = 131, "CALL_FUNCTION";
    MakeFunction = 132, "MAKE_FUNCTION";
    BuildSlice = 133, "BUILD_SLICE";
    LoadClosure = 135, "LOAD_CLOSURE";
    LoadDeref = 136, "LOAD_DEREF";
    StoreDeref = 137, "STORE_DEREF";
    DeleteDeref = 138, "DELETE_DEREF";
    CallFunctionKw = 141, "CALL_FUNCTION_KW";
    CallFunctionEx = 142, "CALL_FUNCTION_EX";
    SetupWith = 143, "SETUP_WITH";
    ExtendedArg = 144, "EXTENDED_ARG";
    ListAppend = 145, "LIST_APPEND";
    SetAdd = 146, "SET_ADD";
    MapAdd = 147, "MAP_ADD";
    LoadClassderef = 148, "LOAD_CLASSDEREF";
    BuildListUnpack = 149, "BUILD_LIST_UNPACK";
    BuildMapUnpack = 150, "BUILD_MAP_UNPACK";
    BuildMapUnpackWithCall = 151, "BUILD_MAP_UNPACK_WITH_CALL";
    BuildTupleUnpack = 152, "BUILD_TUPLE_UNPACK";
    BuildSetUnpack = 153, "BUILD_SET_UNPACK";
    SetupAsyncWith = 154, "SETUP_ASYNC_WITH";
    FormatValue = 155, "FORMAT_VALUE";
    BuildConstKeyMap = 156, "BUILD_CONST_KEY_MAP";
    BuildString = 157, "BUILD_STRING";
    BuildTupleUnpackWithCall = 158, "BUILD_TUPLE_UNPACK_WITH_CALL";
}

/// What the operand byte of an instruction means. Drives disassembly
/// annotations; the dispatch engine interprets operands itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Operand byte is present but ignored.
    None,
    /// Index into the constants table.
    ConstIndex,
    /// Index into the names table.
    NameIndex,
    /// Index into the local-variable-names table.
    LocalIndex,
    /// Forward delta from the offset just past this instruction.
    JumpRelative,
    /// Absolute byte offset from the start of the instruction stream.
    JumpAbsolute,
    /// An element / argument count.
    Count,
    /// One of the eight comparison kinds.
    CompareKind,
    /// Opcode-specific flag bits.
    Flags,
}

impl Opcode {
    /// Whether the operand byte carries meaning for this opcode.
    pub fn has_operand(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// How to interpret the operand byte.
    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            LoadConst => OperandKind::ConstIndex,
            StoreName | DeleteName | StoreAttr | DeleteAttr | StoreGlobal | DeleteGlobal
            | LoadName | LoadAttr | LoadGlobal | ImportName | ImportFrom => OperandKind::NameIndex,
            LoadFast | StoreFast | DeleteFast => OperandKind::LocalIndex,
            JumpForward | ForIter | SetupLoop | SetupExcept | SetupFinally | SetupWith
            | SetupAsyncWith => OperandKind::JumpRelative,
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue
            | ContinueLoop => OperandKind::JumpAbsolute,
            UnpackSequence | BuildTuple | BuildList | BuildSet | BuildMap | BuildConstKeyMap
            | BuildString | BuildTupleUnpack | BuildListUnpack | BuildMapUnpack | BuildSetUnpack
            | BuildMapUnpackWithCall | BuildTupleUnpackWithCall | RaiseVarargs | CallFunction
            | CallFunctionKw | BuildSlice | ListAppend | SetAdd | MapAdd | UnpackEx => {
                OperandKind::Count
            }
            CompareOp => OperandKind::CompareKind,
            MakeFunction | CallFunctionEx | FormatValue | ExtendedArg => OperandKind::Flags,
            _ => OperandKind::None,
        }
    }

    /// Whether the dispatch engine implements this opcode. Recognized but
    /// unsupported instructions fault loudly instead of being approximated.
    pub fn supported(self) -> bool {
        use Opcode::*;
        !matches!(
            self,
            GetAiter
                | GetAnext
                | BeforeAsyncWith
                | SetupAsyncWith
                | GetAwaitable
                | YieldValue
                | YieldFrom
                | SetAdd
                | ListAppend
                | MapAdd
                | SetupWith
                | WithCleanupStart
                | WithCleanupFinish
                | ImportStar
                | ImportName
                | ImportFrom
                | SetupFinally
                | EndFinally
                | UnpackEx
                | BuildConstKeyMap
                | BuildString
                | BuildMapUnpackWithCall
                | BuildTupleUnpackWithCall
                | MakeFunction
                | LoadClosure
                | LoadDeref
                | StoreDeref
                | DeleteDeref
                | LoadClassderef
                | PrintExpr
                | LoadBuildClass
                | ExtendedArg
                | FormatValue
        )
    }
}

/// One of the eight comparison kinds selected by the operand byte of
/// `COMPARE_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    NotIn = 7,
}

impl CompareKind {
    /// Decode the operand byte of `COMPARE_OP`. Bytes above 7 have no
    /// defined comparison and must fault.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Lt),
            1 => Some(Self::Le),
            2 => Some(Self::Eq),
            3 => Some(Self::Ne),
            4 => Some(Self::Gt),
            5 => Some(Self::Ge),
            6 => Some(Self::In),
            7 => Some(Self::NotIn),
            _ => None,
        }
    }

    /// Source-level spelling, for disassembly.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op as u8, byte);
            }
        }
    }

    #[test]
    fn test_unmapped_bytes_have_no_opcode() {
        // Gaps in the numbering must decode to nothing.
        for byte in [0u8, 6, 7, 8, 13, 14, 18, 21, 99, 117, 118, 123, 127, 129, 134, 139, 140] {
            assert!(Opcode::from_u8(byte).is_none(), "byte {byte} should be unmapped");
        }
    }

    #[test]
    fn test_operand_threshold() {
        assert!(!Opcode::ReturnValue.has_operand());
        assert!(!Opcode::PopBlock.has_operand());
        assert!(Opcode::StoreName.has_operand());
        assert!(Opcode::LoadConst.has_operand());
        assert!(Opcode::ForIter.has_operand());
    }

    #[test]
    fn test_supported_families() {
        assert!(Opcode::BinaryAdd.supported());
        assert!(Opcode::ForIter.supported());
        assert!(Opcode::SetupAnnotations.supported());
        assert!(!Opcode::MakeFunction.supported());
        assert!(!Opcode::LoadClosure.supported());
        assert!(!Opcode::ExtendedArg.supported());
        assert!(!Opcode::YieldValue.supported());
    }

    #[test]
    fn test_compare_kind_decoding() {
        assert_eq!(CompareKind::from_u8(2), Some(CompareKind::Eq));
        assert_eq!(CompareKind::from_u8(7), Some(CompareKind::NotIn));
        assert_eq!(CompareKind::from_u8(8), None);
        assert_eq!(CompareKind::Le.symbol(), "<=");
    }
}
