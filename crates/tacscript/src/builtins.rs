//! The built-in operator library.
//!
//! Registers the core language operators with the [`OperatorRegistry`]:
//! control flow (`if`/`then`/`else`, `while`/`do`, `for`/`from`/`to`/`step`,
//! `switch`/`case`/`default`, `try`/`catch`/`throw`), invocation (`call`,
//! `params`, `scopeName`/`breakOut`), arrays (`select`, `set`, `pushBack`,
//! `count`, `forEach`), arithmetic, comparison, logic, namespaces, and a
//! handful of conversions. Everything here goes through the same
//! registration contract an embedder uses; nothing is special-cased in the
//! VM.

use std::rc::Rc;
use std::time::Duration;

use crate::context::{Context, FailureReason};
use crate::diagnostic::{DiagInfo, Severity, msg};
use crate::error::Result;
use crate::frame::{Frame, FrameKind};
use crate::instruction::{Instruction, InstructionSet, OpCode};
use crate::registry::OperatorRegistry;
use crate::scope::NamespaceKind;
use crate::value::{DataType, ForSetup, Side, Value};
use crate::vm::Vm;

/// Scope tag the compiler gives every function body, targeted by `return`.
pub const FUNCTION_SCOPE: &str = "__function__";

/// Install the built-in operator library into a registry.
pub fn install(registry: &mut OperatorRegistry) -> Result<()> {
    use DataType::{Any, Array, Boolean, Code, For, If, Namespace, Scalar, String, Switch, While};

    // --- Nulars -----------------------------------------------------------
    registry.register_nular(
        "nil",
        "The nothing value; can be used to undefine variables.",
        Rc::new(|_, _| Ok(Some(Value::Nothing))),
    )?;
    registry.register_nular(
        "missionNamespace",
        "The default namespace backing non-local variables.",
        Rc::new(|_, _| Ok(Some(Value::Namespace(NamespaceKind::Mission)))),
    )?;
    registry.register_nular(
        "uiNamespace",
        "The namespace tied to the user interface layer.",
        Rc::new(|_, _| Ok(Some(Value::Namespace(NamespaceKind::Ui)))),
    )?;
    registry.register_nular(
        "parsingNamespace",
        "The namespace available while configuration is parsed.",
        Rc::new(|_, _| Ok(Some(Value::Namespace(NamespaceKind::Parsing)))),
    )?;
    registry.register_nular(
        "profileNamespace",
        "The namespace persisted with the player profile.",
        Rc::new(|_, _| Ok(Some(Value::Namespace(NamespaceKind::Profile)))),
    )?;
    registry.register_nular(
        "objNull",
        "The null object handle.",
        Rc::new(|_, _| Ok(Some(Value::Object(Rc::from("<null>"))))),
    )?;
    registry.register_nular(
        "grpNull",
        "The null group handle.",
        Rc::new(|_, _| Ok(Some(Value::Group(Rc::from("<null>"))))),
    )?;
    registry.register_nular(
        "configNull",
        "The null config handle.",
        Rc::new(|_, _| Ok(Some(Value::Config(Rc::from(""))))),
    )?;
    registry.register_nular(
        "sideUnknown",
        "The unknown side.",
        Rc::new(|_, _| Ok(Some(Value::Side(Side::Unknown)))),
    )?;
    registry.register_nular(
        "west",
        "The western side.",
        Rc::new(|_, _| Ok(Some(Value::Side(Side::West)))),
    )?;
    registry.register_nular(
        "east",
        "The eastern side.",
        Rc::new(|_, _| Ok(Some(Value::Side(Side::East)))),
    )?;

    // --- Arithmetic -------------------------------------------------------
    registry.register_binary(
        "+",
        6,
        Scalar,
        Scalar,
        "Adds two numbers.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Scalar(scalar(&l) + scalar(&r))))),
    )?;
    registry.register_binary(
        "+",
        6,
        String,
        String,
        "Concatenates two strings.",
        Rc::new(|_, _, l, r| {
            let mut out = l.as_str().unwrap_or_default().to_string();
            out.push_str(r.as_str().unwrap_or_default());
            Ok(Some(Value::string(out)))
        }),
    )?;
    registry.register_binary(
        "+",
        6,
        Array,
        Array,
        "Concatenates two arrays into a new array.",
        Rc::new(|_, _, l, r| {
            let mut items = l.as_array().map(|a| a.borrow().clone()).unwrap_or_default();
            if let Some(right) = r.as_array() {
                items.extend(right.borrow().iter().cloned());
            }
            Ok(Some(Value::array(items)))
        }),
    )?;
    registry.register_binary(
        "-",
        6,
        Scalar,
        Scalar,
        "Subtracts the right number from the left.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Scalar(scalar(&l) - scalar(&r))))),
    )?;
    registry.register_binary(
        "-",
        6,
        Array,
        Array,
        "Removes every element of the right array from the left.",
        Rc::new(|_, _, l, r| {
            let keep: Vec<Value> = match (l.as_array(), r.as_array()) {
                (Some(left), Some(right)) => {
                    let right = right.borrow();
                    left.borrow()
                        .iter()
                        .filter(|item| !right.iter().any(|drop| drop == *item))
                        .cloned()
                        .collect()
                }
                _ => Vec::new(),
            };
            Ok(Some(Value::array(keep)))
        }),
    )?;
    registry.register_binary(
        "*",
        7,
        Scalar,
        Scalar,
        "Multiplies two numbers.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Scalar(scalar(&l) * scalar(&r))))),
    )?;
    registry.register_binary(
        "/",
        7,
        Scalar,
        Scalar,
        "Divides the left number by the right.",
        Rc::new(|vm, _, l, r| {
            let divisor = scalar(&r);
            if divisor == 0.0 {
                vm.report(msg::DIVISION_BY_ZERO, Severity::Warning, "division by zero");
                Ok(Some(Value::Scalar(f64::NAN)))
            } else {
                Ok(Some(Value::Scalar(scalar(&l) / divisor)))
            }
        }),
    )?;
    registry.register_binary(
        "%",
        7,
        Scalar,
        Scalar,
        "Remainder of dividing the left number by the right.",
        Rc::new(|vm, _, l, r| {
            let divisor = scalar(&r);
            if divisor == 0.0 {
                vm.report(msg::DIVISION_BY_ZERO, Severity::Warning, "division by zero");
                Ok(Some(Value::Scalar(f64::NAN)))
            } else {
                Ok(Some(Value::Scalar(scalar(&l) % divisor)))
            }
        }),
    )?;
    registry.register_binary(
        "^",
        8,
        Scalar,
        Scalar,
        "Raises the left number to the right power.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Scalar(scalar(&l).powf(scalar(&r)))))),
    )?;
    registry.register_unary(
        "-",
        Scalar,
        "Negates a number.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(-scalar(&r))))),
    )?;
    registry.register_unary(
        "+",
        Scalar,
        "Identity on a number.",
        Rc::new(|_, _, r| Ok(Some(r))),
    )?;
    registry.register_unary(
        "abs",
        Scalar,
        "Absolute value.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(scalar(&r).abs())))),
    )?;
    registry.register_unary(
        "floor",
        Scalar,
        "Rounds toward negative infinity.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(scalar(&r).floor())))),
    )?;
    registry.register_unary(
        "ceil",
        Scalar,
        "Rounds toward positive infinity.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(scalar(&r).ceil())))),
    )?;
    registry.register_unary(
        "round",
        Scalar,
        "Rounds to the nearest whole number.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(scalar(&r).round())))),
    )?;
    registry.register_unary(
        "sqrt",
        Scalar,
        "Square root.",
        Rc::new(|_, _, r| Ok(Some(Value::Scalar(scalar(&r).sqrt())))),
    )?;

    // --- Comparison and logic ---------------------------------------------
    registry.register_binary(
        "==",
        3,
        Any,
        Any,
        "Structural equality (1e-9 tolerance on numbers).",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(l == r)))),
    )?;
    registry.register_binary(
        "!=",
        3,
        Any,
        Any,
        "Structural inequality.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(l != r)))),
    )?;
    registry.register_binary(
        "isEqualTo",
        4,
        Any,
        Any,
        "Exact comparison across all types.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(l == r)))),
    )?;
    registry.register_binary(
        "<",
        3,
        Scalar,
        Scalar,
        "Less than.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(scalar(&l) < scalar(&r))))),
    )?;
    registry.register_binary(
        "<=",
        3,
        Scalar,
        Scalar,
        "Less than or equal.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(scalar(&l) <= scalar(&r))))),
    )?;
    registry.register_binary(
        ">",
        3,
        Scalar,
        Scalar,
        "Greater than.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(scalar(&l) > scalar(&r))))),
    )?;
    registry.register_binary(
        ">=",
        3,
        Scalar,
        Scalar,
        "Greater than or equal.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(scalar(&l) >= scalar(&r))))),
    )?;
    registry.register_binary(
        "&&",
        2,
        Boolean,
        Boolean,
        "Logical and.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(l.truthy() && r.truthy())))),
    )?;
    registry.register_binary(
        "&&",
        2,
        Boolean,
        Code,
        "Logical and with a lazily evaluated right side.",
        Rc::new(lazy_and),
    )?;
    registry.register_binary(
        "||",
        1,
        Boolean,
        Boolean,
        "Logical or.",
        Rc::new(|_, _, l, r| Ok(Some(Value::Boolean(l.truthy() || r.truthy())))),
    )?;
    registry.register_binary(
        "||",
        1,
        Boolean,
        Code,
        "Logical or with a lazily evaluated right side.",
        Rc::new(lazy_or),
    )?;
    registry.register_unary(
        "!",
        Boolean,
        "Logical not.",
        Rc::new(|_, _, r| Ok(Some(Value::Boolean(!r.truthy())))),
    )?;

    // --- Conversions and introspection ------------------------------------
    registry.register_unary(
        "str",
        Any,
        "Renders any value in its source form.",
        Rc::new(|_, _, r| Ok(Some(Value::string(r.to_source())))),
    )?;
    registry.register_unary(
        "typeName",
        Any,
        "The type tag of a value, as a string.",
        Rc::new(|_, _, r| Ok(Some(Value::string(r.data_type().to_string())))),
    )?;
    registry.register_unary(
        "comment",
        String,
        "Ignores its argument.",
        Rc::new(|_, _, _| Ok(Some(Value::Nothing))),
    )?;
    registry.register_unary(
        "compile",
        String,
        "Compiles a string of source text into a code value.",
        Rc::new(compile_string),
    )?;
    registry.register_unary(
        "count",
        Array,
        "Number of elements in an array.",
        Rc::new(|_, _, r| {
            let len = r.as_array().map(|a| a.borrow().len()).unwrap_or(0);
            Ok(Some(Value::Scalar(len as f64)))
        }),
    )?;
    registry.register_unary(
        "count",
        String,
        "Number of characters in a string.",
        Rc::new(|_, _, r| {
            let len = r.as_str().map(|s| s.chars().count()).unwrap_or(0);
            Ok(Some(Value::Scalar(len as f64)))
        }),
    )?;

    // --- Invocation -------------------------------------------------------
    registry.register_unary(
        "call",
        Code,
        "Executes a code value in a fresh frame.",
        Rc::new(call_code),
    )?;
    registry.register_binary(
        "call",
        4,
        Any,
        Code,
        "Executes a code value with `_this` bound to the left argument.",
        Rc::new(call_with_args),
    )?;
    registry.register_unary("params", Array, "Binds `_this` elements to named locals.", Rc::new(params_array))?;
    registry.register_unary(
        "private",
        String,
        "Declares a local variable in the current scope.",
        Rc::new(private_string),
    )?;
    registry.register_unary(
        "private",
        Array,
        "Declares several local variables in the current scope.",
        Rc::new(private_array),
    )?;
    registry.register_unary(
        "scopeName",
        String,
        "Tags the current frame for later `breakOut`.",
        Rc::new(|_, context, r| {
            context.name_current_scope(r.as_str().unwrap_or_default());
            Ok(None)
        }),
    )?;
    registry.register_unary(
        "breakOut",
        String,
        "Unwinds to the named frame, ending it with nil.",
        Rc::new(|vm, context, r| break_out(vm, context, Value::Nothing, &r)),
    )?;
    registry.register_binary(
        "breakOut",
        4,
        Any,
        String,
        "Unwinds to the named frame, ending it with the left value.",
        Rc::new(|vm, context, l, r| break_out(vm, context, l, &r)),
    )?;
    registry.register_unary(
        "sleep",
        Scalar,
        "Suspends the context for the given number of seconds.",
        Rc::new(|_, context, r| {
            let seconds = scalar(&r).max(0.0);
            context.suspend_for(Duration::from_secs_f64(seconds));
            Ok(None)
        }),
    )?;

    // --- Conditionals -----------------------------------------------------
    registry.register_unary(
        "if",
        Boolean,
        "Wraps a condition for use with `then`.",
        Rc::new(|_, _, r| Ok(Some(Value::If(r.truthy())))),
    )?;
    registry.register_binary(
        "then",
        4,
        If,
        Code,
        "Runs the code when the condition held; yields nil otherwise.",
        Rc::new(then_code),
    )?;
    registry.register_binary(
        "then",
        4,
        If,
        Array,
        "Runs the first code on true, the second on false.",
        Rc::new(then_branches),
    )?;
    registry.register_binary(
        "else",
        5,
        Code,
        Code,
        "Pairs the true and false branches into a two-element array.",
        Rc::new(|_, _, l, r| Ok(Some(Value::array(vec![l, r])))),
    )?;

    // --- Loops ------------------------------------------------------------
    registry.register_unary(
        "while",
        Code,
        "Marks code as a loop condition for use with `do`.",
        Rc::new(|vm, _, r| match r.as_code() {
            Some(set) => Ok(Some(Value::While(set.clone()))),
            None => Ok(Some(wrong_type(vm, DataType::Code, &r))),
        }),
    )?;
    registry.register_binary(
        "do",
        4,
        While,
        Code,
        "Runs the code as long as the condition evaluates to true.",
        Rc::new(do_while),
    )?;
    registry.register_unary(
        "for",
        String,
        "Starts a counting-loop setup over the named variable.",
        Rc::new(|_, _, r| {
            let setup = ForSetup::new(r.as_str().unwrap_or_default());
            Ok(Some(Value::For(Rc::new(std::cell::RefCell::new(setup)))))
        }),
    )?;
    registry.register_binary(
        "from",
        4,
        For,
        Scalar,
        "Sets the start index of a counting loop.",
        Rc::new(|_, _, l, r| {
            if let Value::For(setup) = &l {
                setup.borrow_mut().from = scalar(&r);
            }
            Ok(Some(l))
        }),
    )?;
    registry.register_binary(
        "to",
        4,
        For,
        Scalar,
        "Sets the end index of a counting loop.",
        Rc::new(|_, _, l, r| {
            if let Value::For(setup) = &l {
                setup.borrow_mut().to = Some(scalar(&r));
            }
            Ok(Some(l))
        }),
    )?;
    registry.register_binary(
        "step",
        4,
        For,
        Scalar,
        "Sets the step size of a counting loop (default 1).",
        Rc::new(|_, _, l, r| {
            if let Value::For(setup) = &l {
                setup.borrow_mut().step = scalar(&r);
            }
            Ok(Some(l))
        }),
    )?;
    registry.register_binary(
        "do",
        4,
        For,
        Code,
        "Runs the code once per index between the loop bounds.",
        Rc::new(do_for),
    )?;
    registry.register_binary(
        "forEach",
        4,
        Code,
        Array,
        "Runs the code once per element with `_x` bound.",
        Rc::new(for_each),
    )?;

    // --- Switch -----------------------------------------------------------
    registry.register_unary(
        "switch",
        Any,
        "Wraps a subject for use with `do` and `case`.",
        Rc::new(|_, _, r| Ok(Some(Value::Switch(Rc::new(r))))),
    )?;
    registry.register_binary(
        "do",
        4,
        Switch,
        Code,
        "Collects cases from the code, then runs the matching one.",
        Rc::new(do_switch),
    )?;
    registry.register_unary(
        "case",
        Any,
        "Wraps a candidate value inside a switch body.",
        Rc::new(|_, _, r| Ok(Some(Value::Switch(Rc::new(r))))),
    )?;
    registry.register_binary(
        ":",
        4,
        Switch,
        Code,
        "Associates code with the preceding case.",
        Rc::new(case_colon),
    )?;
    registry.register_unary(
        "default",
        Code,
        "Registers the fallback code of the enclosing switch.",
        Rc::new(switch_default),
    )?;

    // --- Exceptions -------------------------------------------------------
    registry.register_unary(
        "try",
        Code,
        "Marks code for use with `catch`.",
        Rc::new(|_, _, r| Ok(Some(r))),
    )?;
    registry.register_binary(
        "catch",
        4,
        Code,
        Code,
        "Runs the protected code; on `throw`, runs the handler with `_exception` bound.",
        Rc::new(try_catch),
    )?;
    registry.register_unary(
        "throw",
        Any,
        "Throws a value to the nearest catch handler.",
        Rc::new(throw_value),
    )?;

    // --- Arrays -----------------------------------------------------------
    registry.register_binary(
        "select",
        4,
        Array,
        Scalar,
        "Element at the given index; out-of-range indices yield nil.",
        Rc::new(select_index),
    )?;
    registry.register_binary(
        "select",
        4,
        Array,
        Boolean,
        "Second element on true, first on false.",
        Rc::new(select_flag),
    )?;
    registry.register_binary(
        "select",
        4,
        Array,
        Array,
        "Subrange `[start, length?]` of an array.",
        Rc::new(select_array_range),
    )?;
    registry.register_binary(
        "select",
        4,
        String,
        Array,
        "Subrange `[start, length?]` of a string, in characters.",
        Rc::new(select_string_range),
    )?;
    registry.register_binary("set", 4, Array, Array, "Writes `[index, value]` into an array in place.", Rc::new(set_index))?;
    registry.register_binary(
        "pushBack",
        4,
        Array,
        Any,
        "Appends a value; yields the new element's index.",
        Rc::new(|_, _, l, r| {
            let index = match l.as_array() {
                Some(items) => {
                    items.borrow_mut().push(r);
                    items.borrow().len() as f64 - 1.0
                }
                None => -1.0,
            };
            Ok(Some(Value::Scalar(index)))
        }),
    )?;

    // --- Namespaces -------------------------------------------------------
    registry.register_binary(
        "getVariable",
        4,
        Namespace,
        String,
        "Reads a variable from a namespace; nil when unset.",
        Rc::new(|vm, _, l, r| {
            let Value::Namespace(kind) = l else {
                return Ok(Some(Value::Nothing));
            };
            let name = r.as_str().unwrap_or_default();
            Ok(Some(
                vm.namespace(kind).get(name).cloned().unwrap_or(Value::Nothing),
            ))
        }),
    )?;
    registry.register_binary(
        "getVariable",
        4,
        Namespace,
        Array,
        "Reads `[name, default]` from a namespace.",
        Rc::new(namespace_get_with_default),
    )?;
    registry.register_binary(
        "setVariable",
        4,
        Namespace,
        Array,
        "Writes `[name, value]` into a namespace.",
        Rc::new(namespace_set),
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scalar(value: &Value) -> f64 {
    value.as_scalar().unwrap_or(f64::NAN)
}

fn wrong_type(vm: &mut Vm, expected: DataType, got: &Value) -> Value {
    vm.report(
        msg::WRONG_TYPE,
        Severity::Error,
        format!("expected {}, got {}", expected, got.data_type()),
    );
    Value::Nothing
}

fn empty_set() -> Rc<InstructionSet> {
    Rc::new(InstructionSet::new(
        Vec::new(),
        Rc::from(""),
        Rc::from("<runtime>"),
    ))
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

fn call_code(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(set) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    let mut frame = Frame::new(set);
    frame.scope.set("_this", Value::Nothing);
    context.push_frame(frame);
    Ok(None)
}

fn call_with_args(
    vm: &mut Vm,
    context: &mut Context,
    left: Value,
    right: Value,
) -> Result<Option<Value>> {
    let Some(set) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    let mut frame = Frame::new(set);
    frame.scope.set("_this", left);
    context.push_frame(frame);
    Ok(None)
}

fn params_array(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(names) = right.as_array().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let this = context.get_local("_this").cloned().unwrap_or(Value::Nothing);
    let mut all_bound = true;
    for (index, name) in names.borrow().iter().enumerate() {
        let Some(name) = name.as_str() else {
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                format!("parameter name must be STRING, got {}", name.data_type()),
            );
            all_bound = false;
            continue;
        };
        let bound = match &this {
            Value::Array(items) => items.borrow().get(index).cloned().unwrap_or(Value::Nothing),
            other if index == 0 => other.clone(),
            _ => Value::Nothing,
        };
        if bound.is_nil() {
            all_bound = false;
        }
        context.set_local(name, bound);
    }
    Ok(Some(Value::Boolean(all_bound)))
}

fn private_string(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(name) = right.as_str() else {
        return Ok(Some(wrong_type(vm, DataType::String, &right)));
    };
    if !name.starts_with('_') {
        vm.report(
            msg::WRONG_TYPE,
            Severity::Error,
            format!("`private` expects a local (underscored) name, got `{}`", name),
        );
        return Ok(None);
    }
    context.set_local(name, Value::Nothing);
    Ok(None)
}

fn private_array(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(names) = right.as_array().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    for name in names.borrow().iter() {
        private_string(vm, context, name.clone())?;
    }
    Ok(None)
}

fn break_out(
    vm: &mut Vm,
    context: &mut Context,
    value: Value,
    name: &Value,
) -> Result<Option<Value>> {
    let target = name.as_str().unwrap_or_default();
    if !context.break_out(target, value) {
        vm.report(
            msg::SCOPE_NOT_FOUND,
            Severity::Error,
            format!("no scope named `{}` on the call stack", target),
        );
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Conditionals
// ---------------------------------------------------------------------------

fn then_code(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(set) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    if matches!(left, Value::If(true)) {
        context.push_frame(Frame::new(set));
        Ok(None)
    } else {
        Ok(Some(Value::Nothing))
    }
}

fn then_branches(
    vm: &mut Vm,
    context: &mut Context,
    left: Value,
    right: Value,
) -> Result<Option<Value>> {
    let Some(branches) = right.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let branches = branches.borrow();
    if branches.len() != 2 {
        vm.report(
            msg::WRONG_TYPE,
            Severity::Error,
            format!("`then` expects two branches, got {}", branches.len()),
        );
        return Ok(Some(Value::Nothing));
    }
    let chosen = if matches!(left, Value::If(true)) {
        branches[0].clone()
    } else {
        branches[1].clone()
    };
    drop(branches);
    match chosen.as_code() {
        Some(set) => {
            context.push_frame(Frame::new(set.clone()));
            Ok(None)
        }
        None => Ok(Some(wrong_type(vm, DataType::Code, &chosen))),
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

fn do_while(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Value::While(cond) = left else {
        return Ok(Some(wrong_type(vm, DataType::While, &left)));
    };
    let Some(body) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    context.push_frame(Frame::with_kind(cond, FrameKind::While { body, last: None }));
    Ok(None)
}

fn do_for(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Value::For(setup) = left else {
        return Ok(Some(wrong_type(vm, DataType::For, &left)));
    };
    let Some(body) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    let setup = setup.borrow();
    // An end bound that was never given terminates before the first pass.
    let to = setup.to.unwrap_or(setup.from - setup.step);
    context.push_frame(Frame::with_kind(
        empty_set(),
        FrameKind::For {
            var: Rc::from(setup.var.as_str()),
            to,
            step: setup.step,
            body,
            current: setup.from,
            last: None,
        },
    ));
    Ok(None)
}

fn for_each(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(body) = left.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &left)));
    };
    let Some(items) = right.as_array().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let len = items.borrow().len();
    // Reuses the counting-loop frame: a synthesized prologue binds `_x`
    // from the element at `_forEachIndex` before each body pass.
    let mut instructions = vec![
        Instruction::new(OpCode::Push(Value::Array(items)), DiagInfo::default()),
        Instruction::new(OpCode::GetVariable(Rc::from("_forEachIndex")), DiagInfo::default()),
        Instruction::new(OpCode::CallBinary(Rc::from("select"), 4), DiagInfo::default()),
        Instruction::new(OpCode::AssignToLocal(Rc::from("_x")), DiagInfo::default()),
        Instruction::new(OpCode::EndStatement, DiagInfo::default()),
    ];
    instructions.extend(body.instructions().iter().cloned());
    let wrapped = Rc::new(InstructionSet::new(
        instructions,
        body.source().clone(),
        body.path().clone(),
    ));
    context.push_frame(Frame::with_kind(
        empty_set(),
        FrameKind::For {
            var: Rc::from("_forEachIndex"),
            to: len as f64 - 1.0,
            step: 1.0,
            body: wrapped,
            current: 0.0,
            last: None,
        },
    ));
    Ok(None)
}

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

fn do_switch(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Value::Switch(subject) = left else {
        return Ok(Some(wrong_type(vm, DataType::Switch, &left)));
    };
    let Some(body) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    context.push_frame(Frame::with_kind(
        body,
        FrameKind::Switch {
            subject: subject.as_ref().clone(),
            matched: None,
            default_code: None,
            executing: false,
        },
    ));
    Ok(None)
}

fn case_colon(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Value::Switch(candidate) = left else {
        return Ok(Some(wrong_type(vm, DataType::Switch, &left)));
    };
    let Some(code) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    let Some(frame) = context.top_frame_mut() else {
        return Ok(None);
    };
    match &mut frame.kind {
        FrameKind::Switch {
            subject, matched, ..
        } => {
            if matched.is_none() && candidate.as_ref() == subject {
                *matched = Some(code);
            }
        }
        _ => {
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "`case` used outside of a switch body",
            );
        }
    }
    Ok(None)
}

fn switch_default(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(code) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    let Some(frame) = context.top_frame_mut() else {
        return Ok(None);
    };
    match &mut frame.kind {
        FrameKind::Switch { default_code, .. } => {
            *default_code = Some(code);
        }
        _ => {
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "`default` used outside of a switch body",
            );
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

fn try_catch(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(protected) = left.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &left)));
    };
    let Some(handler) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    context.push_frame(Frame::with_kind(protected, FrameKind::Try { handler }));
    Ok(None)
}

fn throw_value(vm: &mut Vm, context: &mut Context, right: Value) -> Result<Option<Value>> {
    if !context.throw_to_handler(right.clone()) {
        let rendered = right.to_source();
        vm.report(
            msg::UNCAUGHT_EXCEPTION,
            Severity::Error,
            format!("uncaught exception: {}", rendered),
        );
        context.fail(FailureReason::UncaughtException(rendered));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Logic with lazy right sides
// ---------------------------------------------------------------------------

fn lazy_and(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    if !left.truthy() {
        return Ok(Some(Value::Boolean(false)));
    }
    let Some(set) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    context.push_frame(Frame::new(set));
    Ok(None)
}

fn lazy_or(vm: &mut Vm, context: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    if left.truthy() {
        return Ok(Some(Value::Boolean(true)));
    }
    let Some(set) = right.as_code().cloned() else {
        return Ok(Some(wrong_type(vm, DataType::Code, &right)));
    };
    context.push_frame(Frame::new(set));
    Ok(None)
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

fn select_index(vm: &mut Vm, _: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(items) = left.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &left)));
    };
    let items = items.borrow();
    let index = scalar(&right) as i64;
    if index < 0 || index as usize >= items.len() {
        let len = items.len();
        drop(items);
        vm.report(
            msg::INDEX_OUT_OF_RANGE,
            Severity::Warning,
            format!("index {} out of range for array of length {}", index, len),
        );
        return Ok(Some(Value::Nothing));
    }
    Ok(Some(items[index as usize].clone()))
}

fn select_flag(vm: &mut Vm, _: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(items) = left.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &left)));
    };
    let items = items.borrow();
    if items.len() < 2 {
        let len = items.len();
        drop(items);
        vm.report(
            msg::INDEX_OUT_OF_RANGE,
            Severity::Warning,
            format!("boolean select expects two elements, got {}", len),
        );
        return Ok(Some(Value::Nothing));
    }
    let index = usize::from(right.truthy());
    Ok(Some(items[index].clone()))
}

/// Shared `[start, length?]` decoding for the range forms of `select`.
fn decode_range(vm: &mut Vm, range: &Value, len: usize) -> Option<(usize, usize)> {
    let items = range.as_array()?;
    let items = items.borrow();
    let start = match items.first() {
        Some(Value::Scalar(n)) => *n as i64,
        _ => {
            drop(items);
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "range start must be SCALAR",
            );
            return None;
        }
    };
    if start < 0 || start as usize > len {
        drop(items);
        vm.report(
            msg::INDEX_OUT_OF_RANGE,
            Severity::Warning,
            format!("range start {} outside of length {}", start, len),
        );
        return None;
    }
    let start = start as usize;
    let take = match items.get(1) {
        Some(Value::Scalar(n)) if *n >= 0.0 => (*n as usize).min(len - start),
        Some(Value::Scalar(_)) => 0,
        Some(other) => {
            let got = other.data_type();
            drop(items);
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                format!("range length must be SCALAR, got {}", got),
            );
            return None;
        }
        None => len - start,
    };
    Some((start, take))
}

fn select_array_range(
    vm: &mut Vm,
    _: &mut Context,
    left: Value,
    right: Value,
) -> Result<Option<Value>> {
    let Some(items) = left.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &left)));
    };
    let snapshot: Vec<Value> = items.borrow().clone();
    match decode_range(vm, &right, snapshot.len()) {
        Some((start, take)) => Ok(Some(Value::array(
            snapshot.into_iter().skip(start).take(take).collect(),
        ))),
        None => Ok(Some(Value::array(Vec::new()))),
    }
}

fn select_string_range(
    vm: &mut Vm,
    _: &mut Context,
    left: Value,
    right: Value,
) -> Result<Option<Value>> {
    let Some(text) = left.as_str() else {
        return Ok(Some(wrong_type(vm, DataType::String, &left)));
    };
    let chars: Vec<char> = text.chars().collect();
    match decode_range(vm, &right, chars.len()) {
        Some((start, take)) => Ok(Some(Value::string(
            chars.into_iter().skip(start).take(take).collect::<std::string::String>(),
        ))),
        None => Ok(Some(Value::string(""))),
    }
}

fn set_index(vm: &mut Vm, _: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Some(items) = left.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &left)));
    };
    let Some(pair) = right.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let pair = pair.borrow();
    let (index, value) = match (pair.first(), pair.get(1)) {
        (Some(Value::Scalar(n)), Some(value)) => (*n as i64, value.clone()),
        _ => {
            drop(pair);
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "`set` expects `[index, value]`",
            );
            return Ok(Some(Value::Nothing));
        }
    };
    drop(pair);
    if index < 0 {
        vm.report(
            msg::INDEX_OUT_OF_RANGE,
            Severity::Warning,
            format!("cannot set negative index {}", index),
        );
        return Ok(Some(Value::Nothing));
    }
    let mut items = items.borrow_mut();
    let index = index as usize;
    if index >= items.len() {
        items.resize(index + 1, Value::Nothing);
    }
    items[index] = value;
    Ok(Some(Value::Nothing))
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

fn namespace_get_with_default(
    vm: &mut Vm,
    _: &mut Context,
    left: Value,
    right: Value,
) -> Result<Option<Value>> {
    let Value::Namespace(kind) = left else {
        return Ok(Some(wrong_type(vm, DataType::Namespace, &left)));
    };
    let Some(pair) = right.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let pair = pair.borrow();
    let (name, default) = match (pair.first(), pair.get(1)) {
        (Some(Value::String(name)), Some(default)) => (name.clone(), default.clone()),
        _ => {
            drop(pair);
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "`getVariable` expects `[name, default]`",
            );
            return Ok(Some(Value::Nothing));
        }
    };
    drop(pair);
    Ok(Some(
        vm.namespace(kind).get(&name).cloned().unwrap_or(default),
    ))
}

fn namespace_set(vm: &mut Vm, _: &mut Context, left: Value, right: Value) -> Result<Option<Value>> {
    let Value::Namespace(kind) = left else {
        return Ok(Some(wrong_type(vm, DataType::Namespace, &left)));
    };
    let Some(pair) = right.as_array() else {
        return Ok(Some(wrong_type(vm, DataType::Array, &right)));
    };
    let pair = pair.borrow();
    let (name, value) = match (pair.first(), pair.get(1)) {
        (Some(Value::String(name)), Some(value)) => (name.clone(), value.clone()),
        _ => {
            drop(pair);
            vm.report(
                msg::WRONG_TYPE,
                Severity::Error,
                "`setVariable` expects `[name, value]`",
            );
            return Ok(Some(Value::Nothing));
        }
    };
    drop(pair);
    vm.namespace_mut(kind).set(&name, value);
    Ok(Some(Value::Nothing))
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn compile_string(vm: &mut Vm, _: &mut Context, right: Value) -> Result<Option<Value>> {
    let Some(source) = right.as_str() else {
        return Ok(Some(wrong_type(vm, DataType::String, &right)));
    };
    let source = source.to_string();
    match vm.parse(&source, "<compile>") {
        Ok(set) => Ok(Some(Value::Code(set))),
        Err(error) => {
            vm.report(msg::PARSE_ERROR, Severity::Error, error.to_string());
            Ok(Some(Value::Nothing))
        }
    }
}
