//! End-to-end programs run through the engine with the stock host and
//! builtin scope.

use pystep_code::{Asm, CodeObject, CompareKind, Opcode};
use pystep_value::{default_scopes, PyHost, PyValue, RangeValue, ValueError};
use pystep_vm::{Machine, Scopes, VmError};

fn run(code: &CodeObject<PyValue>) -> Scopes<PyValue> {
    let mut machine = Machine::new(code, PyHost, default_scopes());
    machine.run(Some(100_000)).unwrap();
    assert!(machine.finished(), "program did not return");
    machine.into_scopes()
}

fn run_err(code: &CodeObject<PyValue>) -> VmError<ValueError> {
    let mut machine = Machine::new(code, PyHost, default_scopes());
    machine.run(Some(100_000)).unwrap_err()
}

fn return_none(asm: &mut Asm<PyValue>) {
    asm.load_const(PyValue::None).unwrap();
    asm.op(Opcode::ReturnValue);
}

#[test]
fn test_arithmetic_and_comparison_program() {
    // a = 375; b = 2; c = a ** b; d = a // b
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(375)).unwrap();
    asm.store_name("a").unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.store_name("b").unwrap();
    asm.load_name("a").unwrap();
    asm.load_name("b").unwrap();
    asm.op(Opcode::BinaryPower);
    asm.store_name("c").unwrap();
    asm.load_name("a").unwrap();
    asm.load_name("b").unwrap();
    asm.op(Opcode::BinaryFloorDivide);
    asm.store_name("d").unwrap();
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(locals.get("a"), Some(&PyValue::Int(375)));
    assert_eq!(locals.get("b"), Some(&PyValue::Int(2)));
    assert_eq!(locals.get("c"), Some(&PyValue::Int(140_625)));
    assert_eq!(locals.get("d"), Some(&PyValue::Int(187)));
}

#[test]
fn test_loop_with_break_and_continue() {
    // d = 0
    // for i in range(10):
    //     if i == 5: break
    //     if i == 3: d -= 1; continue
    //     d += 1
    let mut asm = Asm::new();
    let loop_top = asm.label();
    let cleanup = asm.label();
    let after = asm.label();
    let not_five = asm.label();
    let not_three = asm.label();

    asm.load_const(PyValue::Int(0)).unwrap();
    asm.store_name("d").unwrap();
    asm.jump_rel(Opcode::SetupLoop, after);
    asm.load_name("range").unwrap();
    asm.load_const(PyValue::Int(10)).unwrap();
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::GetIter);
    asm.bind(loop_top);
    asm.jump_rel(Opcode::ForIter, cleanup);
    asm.store_name("i").unwrap();

    asm.load_name("i").unwrap();
    asm.load_const(PyValue::Int(5)).unwrap();
    asm.compare_op(CompareKind::Eq);
    asm.jump_abs(Opcode::PopJumpIfFalse, not_five);
    asm.op(Opcode::BreakLoop);

    asm.bind(not_five);
    asm.load_name("i").unwrap();
    asm.load_const(PyValue::Int(3)).unwrap();
    asm.compare_op(CompareKind::Eq);
    asm.jump_abs(Opcode::PopJumpIfFalse, not_three);
    asm.load_name("d").unwrap();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.op(Opcode::InplaceSubtract);
    asm.store_name("d").unwrap();
    asm.jump_abs(Opcode::ContinueLoop, loop_top);

    asm.bind(not_three);
    asm.load_name("d").unwrap();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.op(Opcode::InplaceAdd);
    asm.store_name("d").unwrap();
    asm.jump_abs(Opcode::JumpAbsolute, loop_top);

    asm.bind(cleanup);
    asm.op(Opcode::PopBlock);
    asm.bind(after);
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(locals.get("d"), Some(&PyValue::Int(3)));
    // The break fired on i == 5 and nothing past it ran.
    assert_eq!(locals.get("i"), Some(&PyValue::Int(5)));
}

#[test]
fn test_container_and_map_builds_preserve_order() {
    // k = [1, 2, 3]; m = {1: 'a', 2: 'b'}
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.load_const(PyValue::Int(3)).unwrap();
    asm.op_arg(Opcode::BuildList, 3);
    asm.store_name("k").unwrap();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::str("a")).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.load_const(PyValue::str("b")).unwrap();
    asm.op_arg(Opcode::BuildMap, 2);
    asm.store_name("m").unwrap();
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(
        locals.get("k"),
        Some(&PyValue::list(vec![
            PyValue::Int(1),
            PyValue::Int(2),
            PyValue::Int(3)
        ]))
    );
    match locals.get("m") {
        Some(PyValue::Dict(entries)) => {
            let entries = entries.borrow();
            assert_eq!(entries[0], (PyValue::Int(1), PyValue::str("a")));
            assert_eq!(entries[1], (PyValue::Int(2), PyValue::str("b")));
        }
        other => panic!("m is not a dict: {other:?}"),
    }
}

#[test]
fn test_undefined_name_faults_without_partial_state() {
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.store_name("ok").unwrap();
    asm.load_name("never_stored").unwrap();
    asm.store_name("after").unwrap();
    return_none(&mut asm);
    let code = asm.finish().unwrap();

    let mut machine = Machine::new(&code, PyHost, default_scopes());
    let err = machine.run(Some(100)).unwrap_err();
    assert!(matches!(err, VmError::NameNotFound(name) if name == "never_stored"));
    // Everything before the fault is visible, nothing after it.
    let locals = machine.into_scopes().locals;
    assert_eq!(locals.get("ok"), Some(&PyValue::Int(1)));
    assert!(!locals.contains_key("after"));
}

#[test]
fn test_closure_capture_instruction_faults() {
    let mut asm: Asm<PyValue> = Asm::new();
    asm.op_arg(Opcode::LoadClosure, 0);
    assert!(matches!(
        run_err(&asm.finish().unwrap()),
        VmError::UnsupportedOpcode("LOAD_CLOSURE")
    ));
}

#[test]
fn test_for_loop_accumulates() {
    // total = 0
    // for i in range(5): total += i
    let mut asm = Asm::new();
    let loop_top = asm.label();
    let cleanup = asm.label();
    let after = asm.label();
    asm.load_const(PyValue::Int(0)).unwrap();
    asm.store_name("total").unwrap();
    asm.jump_rel(Opcode::SetupLoop, after);
    asm.load_name("range").unwrap();
    asm.load_const(PyValue::Int(5)).unwrap();
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::GetIter);
    asm.bind(loop_top);
    asm.jump_rel(Opcode::ForIter, cleanup);
    asm.store_name("i").unwrap();
    asm.load_name("total").unwrap();
    asm.load_name("i").unwrap();
    asm.op(Opcode::InplaceAdd);
    asm.store_name("total").unwrap();
    asm.jump_abs(Opcode::JumpAbsolute, loop_top);
    asm.bind(cleanup);
    asm.op(Opcode::PopBlock);
    asm.bind(after);
    asm.load_name("total").unwrap();
    asm.op(Opcode::ReturnValue);

    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(Some(10_000)).unwrap();
    assert_eq!(machine.return_value(), Some(&PyValue::Int(10)));
}

#[test]
fn test_unpack_sequence_push_order() {
    // Unpacked items land on the stack in iteration order, so the last
    // element is on top and the first store receives it.
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.load_const(PyValue::Int(3)).unwrap();
    asm.op_arg(Opcode::BuildTuple, 3);
    asm.op_arg(Opcode::UnpackSequence, 3);
    asm.store_name("a").unwrap();
    asm.store_name("b").unwrap();
    asm.store_name("c").unwrap();
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(locals.get("a"), Some(&PyValue::Int(3)));
    assert_eq!(locals.get("b"), Some(&PyValue::Int(2)));
    assert_eq!(locals.get("c"), Some(&PyValue::Int(1)));
}

#[test]
fn test_call_function_positional_order() {
    // min(7, 3) == 3: the first-pushed argument is the first parameter.
    let mut asm = Asm::new();
    asm.load_name("min").unwrap();
    asm.load_const(PyValue::Int(7)).unwrap();
    asm.load_const(PyValue::Int(3)).unwrap();
    asm.op_arg(Opcode::CallFunction, 2);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(machine.return_value(), Some(&PyValue::Int(3)));

    // range(2, 9) keeps start and stop straight.
    let mut asm = Asm::new();
    asm.load_name("range").unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.load_const(PyValue::Int(9)).unwrap();
    asm.op_arg(Opcode::CallFunction, 2);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(
        machine.return_value(),
        Some(&PyValue::Range(RangeValue { start: 2, stop: 9, step: 1 }))
    );
}

#[test]
fn test_call_function_kw_with_empty_names() {
    // A keyword-call site with an empty name tuple degenerates to a
    // positional call.
    let mut asm = Asm::new();
    asm.load_name("len").unwrap();
    asm.load_const(PyValue::str("abcd")).unwrap();
    asm.load_const(PyValue::tuple(Vec::new())).unwrap();
    asm.op_arg(Opcode::CallFunctionKw, 1);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(machine.return_value(), Some(&PyValue::Int(4)));
}

#[test]
fn test_call_function_kw_rejected_by_builtin() {
    let mut asm = Asm::new();
    asm.load_name("len").unwrap();
    asm.load_const(PyValue::str("abcd")).unwrap();
    asm.load_const(PyValue::tuple(vec![PyValue::str("x")])).unwrap();
    asm.op_arg(Opcode::CallFunctionKw, 1);
    let err = run_err(&asm.finish().unwrap());
    assert!(matches!(err, VmError::Value(ValueError::Type(_))));
}

#[test]
fn test_call_function_ex_spreads_arguments() {
    let mut asm = Asm::new();
    asm.load_name("range").unwrap();
    asm.load_const(PyValue::tuple(vec![
        PyValue::Int(2),
        PyValue::Int(9),
        PyValue::Int(3),
    ]))
    .unwrap();
    asm.op_arg(Opcode::CallFunctionEx, 0);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(
        machine.return_value(),
        Some(&PyValue::Range(RangeValue { start: 2, stop: 9, step: 3 }))
    );
}

#[test]
fn test_subscript_store_and_delete() {
    // k = [1, 2, 3]; k[1] = 9; del k[0]
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.load_const(PyValue::Int(3)).unwrap();
    asm.op_arg(Opcode::BuildList, 3);
    asm.store_name("k").unwrap();
    asm.load_const(PyValue::Int(9)).unwrap();
    asm.load_name("k").unwrap();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.op(Opcode::StoreSubscr);
    asm.load_name("k").unwrap();
    asm.load_const(PyValue::Int(0)).unwrap();
    asm.op(Opcode::DeleteSubscr);
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(
        locals.get("k"),
        Some(&PyValue::list(vec![PyValue::Int(9), PyValue::Int(3)]))
    );
}

#[test]
fn test_build_slice_and_subscript() {
    // s = [0, 1, 2, 3, 4][1:4:2]
    let mut asm = Asm::new();
    for n in 0..5 {
        asm.load_const(PyValue::Int(n)).unwrap();
    }
    asm.op_arg(Opcode::BuildList, 5);
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::Int(4)).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.op_arg(Opcode::BuildSlice, 3);
    asm.op(Opcode::BinarySubscr);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(
        machine.return_value(),
        Some(&PyValue::list(vec![PyValue::Int(1), PyValue::Int(3)]))
    );
}

#[test]
fn test_build_slice_invalid_arity() {
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(0)).unwrap();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.op_arg(Opcode::BuildSlice, 4);
    assert!(matches!(
        run_err(&asm.finish().unwrap()),
        VmError::InvalidSliceArity(4)
    ));
}

#[test]
fn test_tuple_unpack_merges_in_push_order() {
    // (1, 2) + (3,) spliced into one tuple.
    let mut asm = Asm::new();
    asm.load_const(PyValue::tuple(vec![PyValue::Int(1), PyValue::Int(2)]))
        .unwrap();
    asm.load_const(PyValue::tuple(vec![PyValue::Int(3)])).unwrap();
    asm.op_arg(Opcode::BuildTupleUnpack, 2);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(
        machine.return_value(),
        Some(&PyValue::tuple(vec![
            PyValue::Int(1),
            PyValue::Int(2),
            PyValue::Int(3)
        ]))
    );
}

#[test]
fn test_map_unpack_merges_in_pop_order() {
    // Sources are consumed top of stack first, so on key conflict the
    // first-pushed map's value lands last and wins.
    let mut asm = Asm::new();
    asm.load_const(PyValue::dict(vec![(PyValue::str("x"), PyValue::Int(1))]))
        .unwrap();
    asm.load_const(PyValue::dict(vec![
        (PyValue::str("x"), PyValue::Int(9)),
        (PyValue::str("y"), PyValue::Int(2)),
    ]))
    .unwrap();
    asm.op_arg(Opcode::BuildMapUnpack, 2);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    match machine.return_value() {
        Some(PyValue::Dict(entries)) => {
            let entries = entries.borrow();
            assert_eq!(entries[0], (PyValue::str("x"), PyValue::Int(1)));
            assert_eq!(entries[1], (PyValue::str("y"), PyValue::Int(2)));
        }
        other => panic!("not a dict: {other:?}"),
    }
}

#[test]
fn test_raise_surfaces_description() {
    let mut asm = Asm::new();
    asm.load_const(PyValue::str("boom")).unwrap();
    asm.op_arg(Opcode::RaiseVarargs, 1);
    match run_err(&asm.finish().unwrap()) {
        VmError::Raised { value, cause } => {
            assert_eq!(value, "'boom'");
            assert!(cause.is_none());
        }
        other => panic!("unexpected fault: {other:?}"),
    }
}

#[test]
fn test_builtin_pipeline() {
    // return sum(list(reversed(range(4))))
    let mut asm = Asm::new();
    asm.load_name("sum").unwrap();
    asm.load_name("list").unwrap();
    asm.load_name("reversed").unwrap();
    asm.load_name("range").unwrap();
    asm.load_const(PyValue::Int(4)).unwrap();
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(machine.return_value(), Some(&PyValue::Int(6)));
}

#[test]
fn test_shared_list_handle_across_names() {
    // k = [1]; j = k; k += [2]; both names see the growth.
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.op_arg(Opcode::BuildList, 1);
    asm.store_name("k").unwrap();
    asm.load_name("k").unwrap();
    asm.store_name("j").unwrap();
    asm.load_name("k").unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.op_arg(Opcode::BuildList, 1);
    asm.op(Opcode::InplaceAdd);
    asm.store_name("k").unwrap();
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    let expected = PyValue::list(vec![PyValue::Int(1), PyValue::Int(2)]);
    assert_eq!(locals.get("k"), Some(&expected));
    assert_eq!(locals.get("j"), Some(&expected));
}

#[test]
fn test_list_method_calls_through_attributes() {
    // k = [1, 2]; k.append(5); x = k.pop(0)
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1)).unwrap();
    asm.load_const(PyValue::Int(2)).unwrap();
    asm.op_arg(Opcode::BuildList, 2);
    asm.store_name("k").unwrap();
    asm.load_name("k").unwrap();
    asm.load_attr("append").unwrap();
    asm.load_const(PyValue::Int(5)).unwrap();
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::PopTop);
    asm.load_name("k").unwrap();
    asm.load_attr("pop").unwrap();
    asm.load_const(PyValue::Int(0)).unwrap();
    asm.op_arg(Opcode::CallFunction, 1);
    asm.store_name("x").unwrap();
    return_none(&mut asm);

    let locals = run(&asm.finish().unwrap()).locals;
    assert_eq!(
        locals.get("k"),
        Some(&PyValue::list(vec![PyValue::Int(2), PyValue::Int(5)]))
    );
    assert_eq!(locals.get("x"), Some(&PyValue::Int(1)));
}

#[test]
fn test_missing_attribute_faults() {
    // k = []; k.sort
    let mut asm = Asm::new();
    asm.op_arg(Opcode::BuildList, 0);
    asm.store_name("k").unwrap();
    asm.load_name("k").unwrap();
    asm.load_attr("sort").unwrap();
    return_none(&mut asm);

    match run_err(&asm.finish().unwrap()) {
        VmError::Value(ValueError::Attribute("list", name)) => assert_eq!(name, "sort"),
        other => panic!("unexpected fault: {other}"),
    }
}

#[test]
fn test_chained_truthiness_jump() {
    // return 'yes' if [] else 'no'
    let mut asm = Asm::new();
    let else_arm = asm.label();
    asm.op_arg(Opcode::BuildList, 0);
    asm.jump_abs(Opcode::PopJumpIfFalse, else_arm);
    asm.load_const(PyValue::str("yes")).unwrap();
    asm.op(Opcode::ReturnValue);
    asm.bind(else_arm);
    asm.load_const(PyValue::str("no")).unwrap();
    asm.op(Opcode::ReturnValue);
    let code = asm.finish().unwrap();
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    machine.run(None).unwrap();
    assert_eq!(machine.return_value(), Some(&PyValue::str("no")));
}
