//! Property tests for the dispatch engine over a bare integer host.

use proptest::prelude::*;
use thiserror::Error;

use pystep_code::{Asm, CompareKind, Opcode};
use pystep_vm::{BinaryOp, Machine, Scopes, SequenceKind, UnaryOp, ValueHost, VmError};

#[derive(Debug, Error)]
#[error("operation not defined for integers")]
struct Undefined;

struct IntHost;

impl ValueHost for IntHost {
    type Value = i64;
    type Error = Undefined;

    fn unary(&self, op: UnaryOp, value: i64) -> Result<i64, Undefined> {
        Ok(match op {
            UnaryOp::Positive => value,
            UnaryOp::Negative => value.wrapping_neg(),
            UnaryOp::Not => i64::from(value == 0),
            UnaryOp::Invert => !value,
        })
    }

    fn binary(&self, op: BinaryOp, left: i64, right: i64) -> Result<i64, Undefined> {
        match op {
            BinaryOp::Add => Ok(left.wrapping_add(right)),
            BinaryOp::Subtract => Ok(left.wrapping_sub(right)),
            BinaryOp::Multiply => Ok(left.wrapping_mul(right)),
            BinaryOp::And => Ok(left & right),
            BinaryOp::Xor => Ok(left ^ right),
            BinaryOp::Or => Ok(left | right),
            _ => Err(Undefined),
        }
    }

    fn compare(&self, kind: CompareKind, left: &i64, right: &i64) -> Result<bool, Undefined> {
        match kind {
            CompareKind::Lt => Ok(left < right),
            CompareKind::Le => Ok(left <= right),
            CompareKind::Eq => Ok(left == right),
            CompareKind::Ne => Ok(left != right),
            CompareKind::Gt => Ok(left > right),
            CompareKind::Ge => Ok(left >= right),
            CompareKind::In | CompareKind::NotIn => Err(Undefined),
        }
    }

    fn truthy(&self, value: &i64) -> Result<bool, Undefined> {
        Ok(*value != 0)
    }

    fn from_bool(&self, value: bool) -> i64 {
        i64::from(value)
    }

    fn make_iter(&self, _value: i64) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn iter_next(&self, _iter: &mut i64) -> Result<Option<i64>, Undefined> {
        Err(Undefined)
    }

    fn get_attr(&self, _object: &i64, _name: &str) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn set_attr(&self, _object: &i64, _name: &str, _value: i64) -> Result<(), Undefined> {
        Err(Undefined)
    }

    fn del_attr(&self, _object: &i64, _name: &str) -> Result<(), Undefined> {
        Err(Undefined)
    }

    fn set_item(&self, _container: &i64, _key: i64, _value: i64) -> Result<(), Undefined> {
        Err(Undefined)
    }

    fn del_item(&self, _container: &i64, _key: i64) -> Result<(), Undefined> {
        Err(Undefined)
    }

    fn call(&self, _callee: i64, _args: Vec<i64>, _kwargs: Vec<(i64, i64)>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn call_ex(&self, _callee: i64, _args: i64, _kwargs: Option<i64>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn make_slice(&self, _start: i64, _stop: i64, _step: Option<i64>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn build(&self, _kind: SequenceKind, _items: Vec<i64>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn build_map(&self, _pairs: Vec<(i64, i64)>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn merge(&self, _kind: SequenceKind, _sources: Vec<i64>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn merge_maps(&self, _sources: Vec<i64>) -> Result<i64, Undefined> {
        Err(Undefined)
    }

    fn describe(&self, value: &i64) -> String {
        value.to_string()
    }
}

fn binary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::BinaryAdd),
        Just(Opcode::BinarySubtract),
        Just(Opcode::BinaryMultiply),
        Just(Opcode::BinaryAnd),
        Just(Opcode::BinaryXor),
        Just(Opcode::BinaryOr),
    ]
}

fn expected(op: Opcode, left: i64, right: i64) -> i64 {
    match op {
        Opcode::BinaryAdd => left.wrapping_add(right),
        Opcode::BinarySubtract => left.wrapping_sub(right),
        Opcode::BinaryMultiply => left.wrapping_mul(right),
        Opcode::BinaryAnd => left & right,
        Opcode::BinaryXor => left ^ right,
        Opcode::BinaryOr => left | right,
        _ => unreachable!(),
    }
}

proptest! {
    /// The first-pushed value is always the left operand of a binary
    /// instruction, for every operator and every operand pair.
    #[test]
    fn binary_stack_order_law(left in any::<i64>(), right in any::<i64>(), op in binary_opcode()) {
        let mut asm = Asm::new();
        asm.load_const(left).unwrap();
        // Interning dedups equal constants, so a second load of the same
        // value reuses the first slot; the stack still sees two pushes.
        asm.load_const(right).unwrap();
        asm.op(op);
        asm.op(Opcode::ReturnValue);
        let code = asm.finish().unwrap();

        let mut machine = Machine::new(&code, IntHost, Scopes::new());
        machine.run(None).unwrap();
        prop_assert_eq!(machine.return_value(), Some(&expected(op, left, right)));
    }

    /// Two fresh runs of the same artifact from the same initial scopes
    /// agree on every observable outcome.
    #[test]
    fn execution_is_deterministic(
        seed in any::<i64>(),
        threshold in 1i64..64,
    ) {
        // count down from seed mod 64 to zero, tallying iterations
        let mut asm = Asm::new();
        let top = asm.label();
        let done = asm.label();
        asm.load_const(0).unwrap();
        asm.store_name("steps").unwrap();
        asm.bind(top);
        asm.load_name("n").unwrap();
        asm.load_const(0).unwrap();
        asm.compare_op(CompareKind::Gt);
        asm.jump_abs(Opcode::PopJumpIfFalse, done);
        asm.load_name("n").unwrap();
        asm.load_const(1).unwrap();
        asm.op(Opcode::BinarySubtract);
        asm.store_name("n").unwrap();
        asm.load_name("steps").unwrap();
        asm.load_const(1).unwrap();
        asm.op(Opcode::BinaryAdd);
        asm.store_name("steps").unwrap();
        asm.jump_abs(Opcode::JumpAbsolute, top);
        asm.bind(done);
        asm.load_name("steps").unwrap();
        asm.op(Opcode::ReturnValue);
        let code = asm.finish().unwrap();

        let initial = seed.rem_euclid(threshold);
        let outcome = |_| {
            let mut scopes = Scopes::new();
            scopes.locals.insert("n".to_owned(), initial);
            let mut machine = Machine::new(&code, IntHost, scopes);
            let steps = machine.run(Some(100_000)).unwrap();
            let returned = machine.return_value().copied();
            let locals: Vec<(String, i64)> = machine
                .into_scopes()
                .locals
                .into_iter()
                .collect();
            (steps, returned, locals)
        };
        let first = outcome(());
        let second = outcome(());
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.1, Some(initial));
    }

    /// Opcode bytes outside the defined set fault with the offending byte,
    /// never panic.
    #[test]
    fn undefined_bytes_fault_cleanly(byte in any::<u8>()) {
        prop_assume!(pystep_code::Opcode::from_u8(byte).is_none());
        let code = pystep_code::CodeObject::<i64> {
            instructions: vec![byte, 0],
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
        };
        let mut machine = Machine::new(&code, IntHost, Scopes::new());
        let err = machine.step().unwrap_err();
        prop_assert!(matches!(err, VmError::UnknownOpcode(b) if b == byte));
    }
}
