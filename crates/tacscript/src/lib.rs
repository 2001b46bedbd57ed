//! tacscript — an embeddable runtime for a mission-scripting language.
//!
//! Scripts in a C-like surface dialect are parsed, lowered into a flat
//! stack bytecode, and executed by a cooperative virtual machine. The
//! public surface of the language is a registry of nular, unary, and
//! binary operators keyed by name and operand types; control flow itself
//! (`if`/`then`, `while`/`do`, `for`, `switch`, `try`/`catch`) is built
//! from those operators plus specialized call-stack frames, which keeps
//! every construct steppable one instruction at a time.
//!
//! # Quick start
//!
//! ```
//! use tacscript::{Value, Vm};
//!
//! let mut vm = Vm::new();
//! let result = vm.eval("let x = [1, 2, 3]; x[1] = 9; x;").unwrap();
//! assert_eq!(
//!     result,
//!     Value::array(vec![Value::Scalar(1.0), Value::Scalar(9.0), Value::Scalar(3.0)])
//! );
//! ```
//!
//! # Registering operators
//!
//! ```
//! use std::rc::Rc;
//! use tacscript::{DataType, Value, Vm};
//!
//! let mut vm = Vm::new();
//! vm.register_unary(
//!     "double",
//!     DataType::Scalar,
//!     "Twice the argument.",
//!     Rc::new(|_, _, right| Ok(Some(Value::Scalar(right.as_scalar().unwrap_or(0.0) * 2.0)))),
//! )
//! .unwrap();
//! assert_eq!(vm.eval("double(21);").unwrap(), Value::Scalar(42.0));
//! ```
//!
//! # Cooperative scheduling
//!
//! A VM owns any number of contexts (one per logical script). Each call to
//! [`Vm::step`] runs exactly one instruction of one context, round-robin,
//! so interleaving is deterministic and a misbehaving script can be
//! cancelled or bounded by [`Limits`] without affecting the others.
//!
//! # What is deliberately absent
//!
//! No JIT, no threads (one VM is one thread; scripts are cooperatively
//! scheduled), no bytecode serialization, and no cycle collector beyond
//! reference counting.

mod ast;
mod builtins;
mod compiler;
mod context;
mod diagnostic;
mod error;
mod frame;
mod instruction;
mod lexer;
mod parser;
mod registry;
mod scope;
mod value;
mod vm;

pub use context::{Context, ContextId, ContextState, FailureReason};
pub use diagnostic::{DiagInfo, RuntimeMessage, Severity, msg};
pub use error::{Error, Result};
pub use frame::{Frame, FrameKind, FrameSnapshot};
pub use instruction::{Instruction, InstructionSet, OpCode};
pub use registry::{
    BinaryHandler, BinaryOp, NularHandler, NularOp, OperatorRegistry, UnaryHandler, UnaryOp,
};
pub use scope::{Namespace, NamespaceKind, Scope};
pub use value::{ArrayRef, DataType, ForSetup, Side, Value};
pub use vm::{Limits, Vm};
