use pretty_assertions::assert_eq;
use tacscript::{ContextState, Error, Limits, Value, Vm};

#[test]
fn arithmetic_precedence() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("1 + 2 * 3;").unwrap(), Value::Scalar(7.0));
    assert_eq!(vm.eval("(1 + 2) * 3;").unwrap(), Value::Scalar(9.0));
    assert_eq!(vm.eval("2 ^ 3 ^ 2;").unwrap(), Value::Scalar(512.0));
    assert_eq!(vm.eval("10 % 3;").unwrap(), Value::Scalar(1.0));
}

#[test]
fn division_by_zero_is_nan_not_fatal() {
    let mut vm = Vm::new();
    let result = vm.eval("1 / 0;").unwrap();
    assert_eq!(result, Value::Scalar(f64::NAN));
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::DIVISION_BY_ZERO)
    );
}

#[test]
fn array_element_assignment() {
    let mut vm = Vm::new();
    let result = vm.eval("let x = [1, 2, 3]; x[1] = 9; x;").unwrap();
    assert_eq!(
        result,
        Value::array(vec![Value::Scalar(1.0), Value::Scalar(9.0), Value::Scalar(3.0)])
    );
}

#[test]
fn arrays_share_storage_across_copies() {
    let mut vm = Vm::new();
    let result = vm.eval("let a = [1]; let b = a; a[0] = 2; b;").unwrap();
    assert_eq!(result, Value::array(vec![Value::Scalar(2.0)]));
}

#[test]
fn if_then_else_yields_branch_value() {
    let mut vm = Vm::new();
    assert_eq!(
        vm.eval("if (true) { \"a\"; } else { \"b\"; }").unwrap(),
        Value::string("a")
    );
    assert_eq!(
        vm.eval("if (1 > 2) { \"a\"; } else { \"b\"; }").unwrap(),
        Value::string("b")
    );
    // No else branch and a false condition yields nil.
    assert_eq!(vm.eval("if (false) { \"a\"; }").unwrap(), Value::Nothing);
}

#[test]
fn ternary_expression() {
    let mut vm = Vm::new();
    assert_eq!(
        vm.eval("let x = 5; x > 3 ? \"big\" : \"small\";").unwrap(),
        Value::string("big")
    );
}

#[test]
fn counting_loop_with_step() {
    let mut vm = Vm::new();
    vm.eval("for (i from 0 to 4 step 2) { y = i; }").unwrap();
    assert_eq!(vm.eval("y;").unwrap(), Value::Scalar(4.0));
}

#[test]
fn counting_loop_downward() {
    let mut vm = Vm::new();
    let result = vm
        .eval("n = 0; for (i from 3 to 1 step -1) { n = n * 10 + i; } n;")
        .unwrap();
    assert_eq!(result, Value::Scalar(321.0));
}

#[test]
fn while_loop_runs_exactly_to_the_bound() {
    let mut vm = Vm::new();
    vm.eval("z = 0; runs = 0; while (z < 3) { z = z + 1; runs = runs + 1; }")
        .unwrap();
    assert_eq!(vm.eval("z;").unwrap(), Value::Scalar(3.0));
    assert_eq!(vm.eval("runs;").unwrap(), Value::Scalar(3.0));
}

#[test]
fn while_loop_result_is_last_body_value() {
    let mut vm = Vm::new();
    let result = vm.eval("let z = 0; while (z < 3) { z = z + 1; z; }").unwrap();
    assert_eq!(result, Value::Scalar(3.0));
}

#[test]
fn do_while_runs_the_body_once() {
    let mut vm = Vm::new();
    vm.eval("z = 0; do { z = z + 1; } while (z < 0);").unwrap();
    assert_eq!(vm.eval("z;").unwrap(), Value::Scalar(1.0));
}

#[test]
fn user_functions_late_bind_through_call() {
    let mut vm = Vm::new();
    let result = vm
        .eval("function add(a, b) { return a + b; } add(10, 32);")
        .unwrap();
    assert_eq!(result, Value::Scalar(42.0));
}

#[test]
fn function_literals_are_values() {
    let mut vm = Vm::new();
    let result = vm
        .eval("let inc = function(n) { return n + 1; }; inc(10);")
        .unwrap();
    assert_eq!(result, Value::Scalar(11.0));
}

#[test]
fn functions_can_recurse() {
    let mut vm = Vm::new();
    let result = vm
        .eval("function fac(n) { return n <= 1 ? 1 : n * fac(n - 1); } fac(5);")
        .unwrap();
    assert_eq!(result, Value::Scalar(120.0));
}

#[test]
fn return_without_value_ends_the_function() {
    let mut vm = Vm::new();
    let result = vm
        .eval("function f() { return; leaked = 1; } f();")
        .unwrap();
    assert_eq!(result, Value::Nothing);
    // The statement after the early return never ran.
    assert_eq!(vm.eval("leaked;").unwrap(), Value::Nothing);
}

#[test]
fn local_shadowing_restores_outer_binding() {
    let mut vm = Vm::new();
    let result = vm.eval("let x = 1; { let x = 2; } x;").unwrap();
    assert_eq!(result, Value::Scalar(1.0));
}

#[test]
fn inner_locals_are_invisible_after_the_block() {
    let mut vm = Vm::new();
    // `y` is declared only inside the block; afterwards the bare name is
    // non-local and unset, producing nil plus a warning.
    let result = vm.eval("{ let y = 2; } y;").unwrap();
    assert_eq!(result, Value::Nothing);
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDEFINED_VARIABLE)
    );
}

#[test]
fn non_local_names_are_case_insensitive() {
    let mut vm = Vm::new();
    vm.eval("Foo = 5;").unwrap();
    assert_eq!(vm.eval("foo;").unwrap(), Value::Scalar(5.0));
    assert_eq!(vm.eval("FOO;").unwrap(), Value::Scalar(5.0));
}

#[test]
fn statements_are_stack_neutral() {
    let mut vm = Vm::new();
    // If earlier statement values leaked, the array literal would absorb
    // them and the final result would be wrong.
    assert_eq!(
        vm.eval("5; [1];").unwrap(),
        Value::array(vec![Value::Scalar(1.0)])
    );
    assert_eq!(vm.eval("1 + 1; 2;").unwrap(), Value::Scalar(2.0));
}

#[test]
fn foreach_binds_each_element() {
    let mut vm = Vm::new();
    let result = vm
        .eval("let total = 0; foreach (v in [1, 2, 3]) { total = total + v; } total;")
        .unwrap();
    assert_eq!(result, Value::Scalar(6.0));
}

#[test]
fn switch_selects_the_matching_case() {
    let mut vm = Vm::new();
    let source = r#"
        let n = 2;
        switch (n) {
            case 1: { "one" }
            case 2: { "two" }
            default: { "many" }
        }
    "#;
    assert_eq!(vm.eval(source).unwrap(), Value::string("two"));
}

#[test]
fn switch_falls_back_to_default() {
    let mut vm = Vm::new();
    let source = r#"
        switch (9) {
            case 1: { "one" }
            default: { "many" }
        }
    "#;
    assert_eq!(vm.eval(source).unwrap(), Value::string("many"));
}

#[test]
fn switch_without_match_or_default_is_nil() {
    let mut vm = Vm::new();
    assert_eq!(
        vm.eval("switch (9) { case 1: { \"one\" } }").unwrap(),
        Value::Nothing
    );
}

#[test]
fn throw_reaches_the_nearest_handler() {
    let mut vm = Vm::new();
    let result = vm
        .eval("try { throw \"boom\"; } catch (e) { e; }")
        .unwrap();
    assert_eq!(result, Value::string("boom"));
}

#[test]
fn rethrow_traverses_to_the_outer_handler() {
    let mut vm = Vm::new();
    let source = r#"
        try {
            try { throw 1; } catch (inner) { throw 2; }
        } catch (outer) {
            x = outer;
        }
        x;
    "#;
    assert_eq!(vm.eval(source).unwrap(), Value::Scalar(2.0));
}

#[test]
fn uncaught_throw_fails_the_context() {
    let mut vm = Vm::new();
    let err = vm.eval("throw 7;").unwrap_err();
    assert!(matches!(err, Error::UncaughtException(_)));
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNCAUGHT_EXCEPTION)
    );
}

#[test]
fn out_of_range_select_warns_and_returns_nil() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("[1, 2, 3][5];").unwrap(), Value::Nothing);
    assert_eq!(vm.eval("[1, 2, 3][-1];").unwrap(), Value::Nothing);
    // Index equal to the length is also out of range.
    assert_eq!(vm.eval("[1, 2, 3][3];").unwrap(), Value::Nothing);
    let hits = vm
        .messages()
        .iter()
        .filter(|m| m.key == tacscript::msg::INDEX_OUT_OF_RANGE)
        .count();
    assert_eq!(hits, 3);
}

#[test]
fn undefined_variables_warn_and_read_as_nil() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("q;").unwrap(), Value::Nothing);
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDEFINED_VARIABLE)
    );
}

#[test]
fn compile_produces_callable_code() {
    let mut vm = Vm::new();
    let result = vm.eval("let f = compile(\"1 + 2;\"); call(f);").unwrap();
    assert_eq!(result, Value::Scalar(3.0));
}

#[test]
fn introspection_operators() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("typeName(5);").unwrap(), Value::string("SCALAR"));
    assert_eq!(
        vm.eval("typeName(\"s\");").unwrap(),
        Value::string("STRING")
    );
    assert_eq!(vm.eval("str([1, 2]);").unwrap(), Value::string("[1, 2]"));
    assert_eq!(vm.eval("str(\"a\");").unwrap(), Value::string("\"a\""));
}

#[test]
fn namespaces_are_reachable_as_nulars() {
    let mut vm = Vm::new();
    let result = vm.eval("missionNamespace;").unwrap();
    assert_eq!(result.data_type(), tacscript::DataType::Namespace);
}

#[test]
fn instruction_budget_unwinds_the_context() {
    let mut vm = Vm::new();
    vm.set_limits(Limits {
        max_steps: Some(500),
        max_runtime: None,
    });
    let err = vm.eval("while (true) { }").unwrap_err();
    assert!(matches!(err, Error::MaxInstructions(500)));
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::MAX_INSTRUCTIONS)
    );
}

#[test]
fn empty_loop_bodies_still_consume_budget() {
    let mut vm = Vm::new();
    vm.set_limits(Limits {
        max_steps: Some(1_000),
        max_runtime: None,
    });
    let err = vm.eval("for (i from 0 to 1000000) { }").unwrap_err();
    assert!(matches!(err, Error::MaxInstructions(_)));
}

#[test]
fn failed_contexts_keep_a_frame_snapshot() {
    let mut vm = Vm::new();
    vm.set_limits(Limits {
        max_steps: Some(100),
        max_runtime: None,
    });
    let set = vm.parse("while (true) { }", "loop.tac").unwrap();
    let id = vm.create_context(set);
    vm.run_until_idle();
    assert_eq!(vm.context_state(id), Some(ContextState::Failed));
    let context = vm.context(id).unwrap();
    assert!(context.failure_trace().is_some());
    assert!(!context.failure_trace().unwrap().is_empty());
}

#[test]
fn cancellation_unwinds_without_firing_operators() {
    let mut vm = Vm::new();
    let set = vm.parse("while (true) { x = 1; }", "loop.tac").unwrap();
    let id = vm.create_context(set);
    for _ in 0..10 {
        vm.step();
    }
    assert!(vm.cancel(id));
    vm.step();
    assert_eq!(vm.context_state(id), Some(ContextState::Failed));
    assert!(matches!(
        vm.context_outcome(id),
        Err(Error::ContextFailed(_))
    ));
}

#[test]
fn cooperative_scheduling_is_fair() {
    let mut vm = Vm::new();
    let a = vm.parse("while (true) { }", "a.tac").unwrap();
    let b = vm.parse("while (true) { }", "b.tac").unwrap();
    let first = vm.create_context(a);
    let second = vm.create_context(b);
    for _ in 0..1_000 {
        assert!(vm.step());
    }
    let first_steps = vm.context(first).unwrap().steps() as i64;
    let second_steps = vm.context(second).unwrap().steps() as i64;
    assert!((first_steps - second_steps).abs() <= 1);
}

#[test]
fn execution_traces_are_deterministic() {
    let run = || {
        let mut vm = Vm::new();
        let result = vm.eval("q; 1 / 0; [1][5]; 2;").unwrap();
        (result, vm.take_messages())
    };
    let (first_value, first_messages) = run();
    let (second_value, second_messages) = run();
    assert_eq!(first_value, second_value);
    assert_eq!(first_messages, second_messages);
}

#[test]
fn sleeping_contexts_resume_after_their_wake_time() {
    let mut vm = Vm::new();
    let set = vm.parse("sleep(0.01); done = true; done;", "s.tac").unwrap();
    let id = vm.create_context(set);
    vm.run_until_idle();
    assert_eq!(vm.context_state(id), Some(ContextState::Suspended));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while vm.context_state(id) != Some(ContextState::Done) {
        assert!(std::time::Instant::now() < deadline, "context never woke");
        std::thread::sleep(std::time::Duration::from_millis(2));
        vm.run_until_idle();
    }
    assert_eq!(vm.context_outcome(id).unwrap(), Value::Boolean(true));
}

#[test]
fn namespaces_persist_across_eval_calls() {
    let mut vm = Vm::new();
    vm.eval("counter = 1;").unwrap();
    vm.eval("counter = counter + 1;").unwrap();
    assert_eq!(vm.eval("counter;").unwrap(), Value::Scalar(2.0));
}

#[test]
fn break_out_of_a_missing_scope_is_reported() {
    let mut vm = Vm::new();
    vm.eval("breakOut(\"nowhere\");").unwrap();
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::SCOPE_NOT_FOUND)
    );
}

#[test]
fn private_declares_a_local_in_place() {
    let mut vm = Vm::new();
    // Reading the declared (but unset) local yields nil without the
    // undefined-variable warning an unknown name would produce.
    vm.eval("private(\"_tmp\"); _tmp;").unwrap();
    assert!(
        !vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDEFINED_VARIABLE)
    );
    let mut vm = Vm::new();
    vm.eval("_tmp;").unwrap();
    assert!(
        vm.messages()
            .iter()
            .any(|m| m.key == tacscript::msg::UNDEFINED_VARIABLE)
    );
}

#[test]
fn number_literals() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("0xFF;").unwrap(), Value::Scalar(255.0));
    assert_eq!(vm.eval("1.5e-3;").unwrap(), Value::Scalar(0.0015));
}

#[test]
fn boolean_operators() {
    let mut vm = Vm::new();
    assert_eq!(vm.eval("true && false;").unwrap(), Value::Boolean(false));
    assert_eq!(vm.eval("true || false;").unwrap(), Value::Boolean(true));
    assert_eq!(vm.eval("!true;").unwrap(), Value::Boolean(false));
    assert_eq!(vm.eval("1 > 0 && 2 > 1;").unwrap(), Value::Boolean(true));
}
