use std::rc::Rc;

use pretty_assertions::assert_eq;
use tacscript::{
    DataType, DiagInfo, Error, Instruction, InstructionSet, NamespaceKind, OpCode, Value, Vm,
};

/// Assemble a raw instruction set, bypassing the surface dialect.
fn assemble(ops: Vec<OpCode>) -> Rc<InstructionSet> {
    let instructions = ops
        .into_iter()
        .map(|op| Instruction::new(op, DiagInfo::default()))
        .collect();
    Rc::new(InstructionSet::new(
        instructions,
        Rc::from(""),
        Rc::from("<test>"),
    ))
}

fn run(vm: &mut Vm, set: Rc<InstructionSet>) -> Value {
    let id = vm.create_context(set);
    vm.run_until_idle();
    vm.context_outcome(id).unwrap()
}

#[test]
fn dispatch_prefers_the_specific_overload() {
    let mut vm = Vm::new();
    vm.register_binary(
        "pick",
        4,
        DataType::Any,
        DataType::Scalar,
        "wildcard overload",
        Rc::new(|_, _, _, _| Ok(Some(Value::string("any")))),
    )
    .unwrap();
    vm.register_binary(
        "pick",
        4,
        DataType::Array,
        DataType::Scalar,
        "array overload",
        Rc::new(|_, _, _, _| Ok(Some(Value::string("array")))),
    )
    .unwrap();

    let set = assemble(vec![
        OpCode::Push(Value::array(vec![Value::Scalar(1.0)])),
        OpCode::Push(Value::Scalar(0.0)),
        OpCode::CallBinary(Rc::from("pick"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::string("array"));

    let set = assemble(vec![
        OpCode::Push(Value::string("s")),
        OpCode::Push(Value::Scalar(0.0)),
        OpCode::CallBinary(Rc::from("pick"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::string("any"));
}

#[test]
fn duplicate_registration_is_an_error() {
    let mut vm = Vm::new();
    vm.register_unary(
        "probe",
        DataType::Scalar,
        "",
        Rc::new(|_, _, _| Ok(Some(Value::Nothing))),
    )
    .unwrap();
    let err = vm
        .register_unary(
            "PROBE",
            DataType::Scalar,
            "",
            Rc::new(|_, _, _| Ok(Some(Value::Nothing))),
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateOverload { .. }));
}

#[test]
fn dispatch_miss_pushes_nil_and_continues() {
    let mut vm = Vm::new();
    // `+` has no (BOOLEAN, SCALAR) overload.
    let set = assemble(vec![
        OpCode::Push(Value::Boolean(true)),
        OpCode::Push(Value::Scalar(1.0)),
        OpCode::CallBinary(Rc::from("+"), 6),
    ]);
    assert_eq!(run(&mut vm, set), Value::Nothing);
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNKNOWN_INPUT_TYPE_COMBINATION)
    );
}

#[test]
fn binary_call_binds_this_to_the_left_operand() {
    let mut vm = Vm::new();
    let body = vm.parse("_this + 1;", "f.tac").unwrap();
    let set = assemble(vec![
        OpCode::Push(Value::Scalar(10.0)),
        OpCode::Push(Value::Code(body)),
        OpCode::CallBinary(Rc::from("call"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::Scalar(11.0));
}

#[test]
fn namespace_operators_read_and_write() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::CallNular(Rc::from("uinamespace")),
        OpCode::Push(Value::string("Counter")),
        OpCode::Push(Value::Scalar(9.0)),
        OpCode::MakeArray(2),
        OpCode::CallBinary(Rc::from("setvariable"), 4),
        OpCode::EndStatement,
        OpCode::CallNular(Rc::from("uinamespace")),
        OpCode::Push(Value::string("counter")),
        OpCode::CallBinary(Rc::from("getvariable"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::Scalar(9.0));
    assert_eq!(
        vm.namespace(NamespaceKind::Ui).get("COUNTER"),
        Some(&Value::Scalar(9.0))
    );
    // The mission namespace was not touched.
    assert_eq!(vm.namespace(NamespaceKind::Mission).get("counter"), None);
}

#[test]
fn namespace_get_with_default() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::CallNular(Rc::from("missionnamespace")),
        OpCode::Push(Value::string("missing")),
        OpCode::Push(Value::Scalar(4.0)),
        OpCode::MakeArray(2),
        OpCode::CallBinary(Rc::from("getvariable"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::Scalar(4.0));
}

#[test]
fn assigning_an_undeclared_local_is_reported() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::Push(Value::Scalar(1.0)),
        OpCode::AssignTo(Rc::from("_zz")),
    ]);
    run(&mut vm, set);
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDECLARED_LOCAL)
    );
}

#[test]
fn lazy_boolean_overload_takes_code_on_the_right() {
    let mut vm = Vm::new();
    let never = vm.parse("q;", "lazy.tac").unwrap();
    let set = assemble(vec![
        OpCode::Push(Value::Boolean(false)),
        OpCode::Push(Value::Code(never)),
        OpCode::CallBinary(Rc::from("&&"), 1),
    ]);
    assert_eq!(run(&mut vm, set), Value::Boolean(false));
    // The short-circuited right side never evaluated `q`.
    assert!(
        !vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDEFINED_VARIABLE)
    );

    let taken = vm.parse("1 > 0;", "lazy.tac").unwrap();
    let set = assemble(vec![
        OpCode::Push(Value::Boolean(true)),
        OpCode::Push(Value::Code(taken)),
        OpCode::CallBinary(Rc::from("&&"), 1),
    ]);
    assert_eq!(run(&mut vm, set), Value::Boolean(true));
}

#[test]
fn range_select_on_arrays_and_strings() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::Push(Value::array(vec![
            Value::Scalar(1.0),
            Value::Scalar(2.0),
            Value::Scalar(3.0),
            Value::Scalar(4.0),
        ])),
        OpCode::Push(Value::Scalar(1.0)),
        OpCode::Push(Value::Scalar(2.0)),
        OpCode::MakeArray(2),
        OpCode::CallBinary(Rc::from("select"), 4),
    ]);
    assert_eq!(
        run(&mut vm, set),
        Value::array(vec![Value::Scalar(2.0), Value::Scalar(3.0)])
    );

    let set = assemble(vec![
        OpCode::Push(Value::string("mission")),
        OpCode::Push(Value::Scalar(0.0)),
        OpCode::Push(Value::Scalar(4.0)),
        OpCode::MakeArray(2),
        OpCode::CallBinary(Rc::from("select"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::string("miss"));
}

#[test]
fn boolean_select_picks_by_flag() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::Push(Value::array(vec![Value::string("no"), Value::string("yes")])),
        OpCode::Push(Value::Boolean(true)),
        OpCode::CallBinary(Rc::from("select"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::string("yes"));
}

#[test]
fn set_extends_the_array_with_nil() {
    let mut vm = Vm::new();
    let result = vm.eval("let xs = [1]; xs[3] = 9; xs;").unwrap();
    assert_eq!(
        result,
        Value::array(vec![
            Value::Scalar(1.0),
            Value::Nothing,
            Value::Nothing,
            Value::Scalar(9.0),
        ])
    );
}

#[test]
fn count_overloads_by_operand_type() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::Push(Value::array(vec![Value::Scalar(1.0), Value::Scalar(2.0)])),
        OpCode::CallUnary(Rc::from("count")),
    ]);
    assert_eq!(run(&mut vm, set), Value::Scalar(2.0));

    let set = assemble(vec![
        OpCode::Push(Value::string("über")),
        OpCode::CallUnary(Rc::from("count")),
    ]);
    // Characters, not bytes.
    assert_eq!(run(&mut vm, set), Value::Scalar(4.0));
}

#[test]
fn is_equal_to_compares_across_types() {
    let mut vm = Vm::new();
    let set = assemble(vec![
        OpCode::Push(Value::string("a")),
        OpCode::Push(Value::Scalar(1.0)),
        OpCode::CallBinary(Rc::from("isequalto"), 4),
    ]);
    assert_eq!(run(&mut vm, set), Value::Boolean(false));
}

#[test]
fn reconstruction_rebuilds_source_form() {
    let mut vm = Vm::new();
    let set = vm.parse("1 + 2 * 3;", "r.tac").unwrap();
    assert_eq!(set.reconstruct(), "1 + 2 * 3");
    let set = vm.parse("xs = [1, 2];", "r.tac").unwrap();
    assert_eq!(set.reconstruct(), "xs = [1, 2]");
}

#[test]
fn registered_operators_are_visible_to_the_compiler() {
    let mut vm = Vm::new();
    vm.register_unary(
        "double",
        DataType::Scalar,
        "Twice the argument.",
        Rc::new(|_, _, right| {
            Ok(Some(Value::Scalar(right.as_scalar().unwrap_or(0.0) * 2.0)))
        }),
    )
    .unwrap();
    // Call syntax resolves the new operator at lowering time.
    assert_eq!(vm.eval("double(21);").unwrap(), Value::Scalar(42.0));
}

#[test]
fn unknown_callees_late_bind_as_user_functions() {
    let mut vm = Vm::new();
    vm.eval("twice = function(n) { return n * 2; };").unwrap();
    assert_eq!(vm.eval("twice(4);").unwrap(), Value::Scalar(8.0));
}
