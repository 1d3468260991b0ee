#![no_main]
use libfuzzer_sys::fuzz_target;

use pystep_code::CodeObject;
use pystep_value::{default_scopes, PyHost, PyValue};
use pystep_vm::Machine;

// Arbitrary bytes as an instruction stream: every outcome must be a typed
// fault or a clean finish, never a panic.
fuzz_target!(|data: &[u8]| {
    let code = CodeObject {
        instructions: data.to_vec(),
        consts: vec![
            PyValue::None,
            PyValue::Int(3),
            PyValue::str("s"),
            PyValue::list(vec![PyValue::Int(1), PyValue::Int(2)]),
            PyValue::tuple(vec![PyValue::Int(0)]),
        ],
        names: vec!["a".to_owned(), "b".to_owned(), "range".to_owned()],
        varnames: vec!["x".to_owned()],
    };
    let mut machine = Machine::new(&code, PyHost, default_scopes());
    let _ = machine.run(Some(10_000));
});
