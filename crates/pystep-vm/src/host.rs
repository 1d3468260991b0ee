//! The value capability contract.
//!
//! The dispatch engine treats operands as opaque values and delegates every
//! operation it does not define itself — arithmetic, comparison, iteration,
//! attribute and subscript access, invocation, container construction — to
//! an implementation of [`ValueHost`] supplied by the embedder. The engine
//! never implements this trait; keeping the boundary here decouples the
//! interpreter core from the breadth of any particular value system.

use std::error::Error;
use std::fmt::Debug;

use pystep_code::CompareKind;

/// Unary operations (`+x`, `-x`, `not x`, `~x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

/// Binary operations, shared by the plain and in-place opcode families.
/// `Subscript` is `left[right]`. Hosts may reject operations they do not
/// model (`MatrixMultiply`, typically).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Power,
    Multiply,
    MatrixMultiply,
    FloorDivide,
    TrueDivide,
    Modulo,
    Add,
    Subtract,
    Subscript,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

/// Which sequence container a `BUILD_*` / `BUILD_*_UNPACK` opcode produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Tuple,
    List,
    Set,
}

/// Operations the dispatch engine requires from the external value system.
///
/// All methods take `&self`; hosts that need mutation (list element
/// assignment, iterator advance) use interior mutability in their value
/// representation. Failures surface to the engine's caller unchanged as
/// `VmError::Value`.
pub trait ValueHost {
    /// The opaque operand type.
    type Value: Clone + Debug;
    /// The host's operation-failure type.
    type Error: Error + Send + Sync + 'static;

    fn unary(&self, op: UnaryOp, value: Self::Value) -> Result<Self::Value, Self::Error>;

    fn binary(
        &self,
        op: BinaryOp,
        left: Self::Value,
        right: Self::Value,
    ) -> Result<Self::Value, Self::Error>;

    /// In-place variant of [`binary`](Self::binary). The default falls back
    /// to the binary result; hosts override it for values with genuine
    /// in-place behavior (list `+=`, for instance).
    fn inplace(
        &self,
        op: BinaryOp,
        target: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, Self::Error> {
        self.binary(op, target, rhs)
    }

    /// Apply one of the eight comparison kinds, producing a (host-typed)
    /// boolean value.
    fn compare(
        &self,
        kind: CompareKind,
        left: &Self::Value,
        right: &Self::Value,
    ) -> Result<bool, Self::Error>;

    /// Truthiness, for conditional jumps.
    fn truthy(&self, value: &Self::Value) -> Result<bool, Self::Error>;

    /// Boolean embedding, for `COMPARE_OP` and `UNARY_NOT` results.
    fn from_bool(&self, value: bool) -> Self::Value;

    /// Replace a value with an iterator view of it. Must be idempotent on
    /// values that are already iterator-shaped.
    fn make_iter(&self, value: Self::Value) -> Result<Self::Value, Self::Error>;

    /// Advance an iterator: `Some(item)` on success, `None` on exhaustion.
    fn iter_next(&self, iter: &mut Self::Value) -> Result<Option<Self::Value>, Self::Error>;

    fn get_attr(&self, object: &Self::Value, name: &str) -> Result<Self::Value, Self::Error>;

    fn set_attr(
        &self,
        object: &Self::Value,
        name: &str,
        value: Self::Value,
    ) -> Result<(), Self::Error>;

    fn del_attr(&self, object: &Self::Value, name: &str) -> Result<(), Self::Error>;

    /// Subscript store: `container[key] = value`.
    fn set_item(
        &self,
        container: &Self::Value,
        key: Self::Value,
        value: Self::Value,
    ) -> Result<(), Self::Error>;

    /// Subscript delete: `del container[key]`.
    fn del_item(&self, container: &Self::Value, key: Self::Value) -> Result<(), Self::Error>;

    /// Invoke a callable with positional arguments (in call order) and
    /// keyword pairs (name value, argument value, in keyword order).
    fn call(
        &self,
        callee: Self::Value,
        args: Vec<Self::Value>,
        kwargs: Vec<(Self::Value, Self::Value)>,
    ) -> Result<Self::Value, Self::Error>;

    /// Invoke a callable with an argument sequence and an optional keyword
    /// mapping, both host values (`CALL_FUNCTION_EX`).
    fn call_ex(
        &self,
        callee: Self::Value,
        args: Self::Value,
        kwargs: Option<Self::Value>,
    ) -> Result<Self::Value, Self::Error>;

    /// Construct a slice value from two or three bounds.
    fn make_slice(
        &self,
        start: Self::Value,
        stop: Self::Value,
        step: Option<Self::Value>,
    ) -> Result<Self::Value, Self::Error>;

    /// Build a sequence container from items in source order.
    fn build(&self, kind: SequenceKind, items: Vec<Self::Value>) -> Result<Self::Value, Self::Error>;

    /// Build a mapping from key/value pairs in source order.
    fn build_map(
        &self,
        pairs: Vec<(Self::Value, Self::Value)>,
    ) -> Result<Self::Value, Self::Error>;

    /// Merge existing containers into one sequence, in the order given,
    /// using each source's own iteration semantics.
    fn merge(
        &self,
        kind: SequenceKind,
        sources: Vec<Self::Value>,
    ) -> Result<Self::Value, Self::Error>;

    /// Merge existing mappings into one, in the order given.
    fn merge_maps(&self, sources: Vec<Self::Value>) -> Result<Self::Value, Self::Error>;

    /// Human-readable rendering, used for raised-value diagnostics.
    fn describe(&self, value: &Self::Value) -> String;
}
