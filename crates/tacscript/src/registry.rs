//! Operator registration and typed dispatch.
//!
//! Operators are the extension surface of the runtime: every built-in and
//! every embedder-provided behavior is a `(name, arity)` key with one or
//! more overloads keyed by declared operand types. Dispatch happens at
//! execution time against the runtime tags of the popped operands.

use std::collections::HashMap;
use std::rc::Rc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::{DataType, Value};
use crate::vm::Vm;

/// Callback of a nular operator.
///
/// Handlers may push or replace frames on the context; returning `None`
/// signals exactly that and suppresses the result push.
pub type NularHandler = Rc<dyn Fn(&mut Vm, &mut Context) -> Result<Option<Value>>>;

/// Callback of a unary operator, receiving the right operand.
pub type UnaryHandler = Rc<dyn Fn(&mut Vm, &mut Context, Value) -> Result<Option<Value>>>;

/// Callback of a binary operator, receiving left and right operands.
pub type BinaryHandler = Rc<dyn Fn(&mut Vm, &mut Context, Value, Value) -> Result<Option<Value>>>;

pub struct NularOp {
    pub name: Rc<str>,
    pub description: &'static str,
    pub handler: NularHandler,
}

pub struct UnaryOp {
    pub name: Rc<str>,
    pub right: DataType,
    pub description: &'static str,
    pub handler: UnaryHandler,
}

pub struct BinaryOp {
    pub name: Rc<str>,
    pub precedence: u8,
    pub left: DataType,
    pub right: DataType,
    pub description: &'static str,
    pub handler: BinaryHandler,
}

/// A multimap from `(lowercased name, arity)` to typed overloads.
#[derive(Default)]
pub struct OperatorRegistry {
    nular: HashMap<String, NularOp>,
    unary: HashMap<String, Vec<UnaryOp>>,
    binary: HashMap<String, Vec<BinaryOp>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_nular(
        &mut self,
        name: &str,
        description: &'static str,
        handler: NularHandler,
    ) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.nular.contains_key(&key) {
            return Err(Error::DuplicateOverload {
                name: key,
                arity: 0,
                left: DataType::Nothing,
                right: DataType::Nothing,
            });
        }
        self.nular.insert(
            key.clone(),
            NularOp {
                name: Rc::from(key.as_str()),
                description,
                handler,
            },
        );
        Ok(())
    }

    pub fn register_unary(
        &mut self,
        name: &str,
        right: DataType,
        description: &'static str,
        handler: UnaryHandler,
    ) -> Result<()> {
        let key = name.to_ascii_lowercase();
        let overloads = self.unary.entry(key.clone()).or_default();
        if overloads.iter().any(|op| op.right == right) {
            return Err(Error::DuplicateOverload {
                name: key,
                arity: 1,
                left: DataType::Nothing,
                right,
            });
        }
        overloads.push(UnaryOp {
            name: Rc::from(key.as_str()),
            right,
            description,
            handler,
        });
        Ok(())
    }

    pub fn register_binary(
        &mut self,
        name: &str,
        precedence: u8,
        left: DataType,
        right: DataType,
        description: &'static str,
        handler: BinaryHandler,
    ) -> Result<()> {
        let key = name.to_ascii_lowercase();
        let overloads = self.binary.entry(key.clone()).or_default();
        if overloads.iter().any(|op| op.left == left && op.right == right) {
            return Err(Error::DuplicateOverload {
                name: key,
                arity: 2,
                left,
                right,
            });
        }
        overloads.push(BinaryOp {
            name: Rc::from(key.as_str()),
            precedence,
            left,
            right,
            description,
            handler,
        });
        Ok(())
    }

    pub fn nular(&self, name: &str) -> Option<&NularOp> {
        self.nular.get(&name.to_ascii_lowercase())
    }

    pub fn has_unary(&self, name: &str) -> bool {
        self.unary.contains_key(&name.to_ascii_lowercase())
    }

    pub fn has_binary(&self, name: &str) -> bool {
        self.binary.contains_key(&name.to_ascii_lowercase())
    }

    pub fn unary_overloads(&self, name: &str) -> Option<&[UnaryOp]> {
        self.unary.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }

    /// Precedence of a binary operator (all overloads of one name share it
    /// by convention; the first registration wins).
    pub fn binary_precedence(&self, name: &str) -> Option<u8> {
        self.binary
            .get(&name.to_ascii_lowercase())
            .and_then(|ops| ops.first())
            .map(|op| op.precedence)
    }

    /// Pick the unary overload for a runtime operand type.
    ///
    /// An overload matches when its declared type equals the runtime tag or
    /// is the `Any` wildcard; exact matches beat wildcard matches.
    pub fn resolve_unary(&self, name: &str, right: DataType) -> Option<&UnaryOp> {
        let overloads = self.unary.get(&name.to_ascii_lowercase())?;
        overloads
            .iter()
            .filter(|op| slot_matches(op.right, right))
            .min_by_key(|op| op.right == DataType::Any)
    }

    /// Pick the binary overload for a pair of runtime operand types.
    ///
    /// Both slots must match; among matches a non-`Any` left slot wins
    /// first, then a non-`Any` right slot.
    pub fn resolve_binary(&self, name: &str, left: DataType, right: DataType) -> Option<&BinaryOp> {
        let overloads = self.binary.get(&name.to_ascii_lowercase())?;
        overloads
            .iter()
            .filter(|op| slot_matches(op.left, left) && slot_matches(op.right, right))
            .min_by_key(|op| (op.left == DataType::Any, op.right == DataType::Any))
    }
}

fn slot_matches(declared: DataType, runtime: DataType) -> bool {
    declared == DataType::Any || declared == runtime
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_binary() -> BinaryHandler {
        Rc::new(|_, _, _, _| Ok(Some(Value::Nothing)))
    }

    fn noop_unary() -> UnaryHandler {
        Rc::new(|_, _, _| Ok(Some(Value::Nothing)))
    }

    #[test]
    fn specific_overload_beats_wildcard() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_binary("pick", 4, DataType::Any, DataType::Scalar, "", noop_binary())
            .unwrap();
        registry
            .register_binary("pick", 4, DataType::Array, DataType::Scalar, "", noop_binary())
            .unwrap();

        let resolved = registry
            .resolve_binary("pick", DataType::Array, DataType::Scalar)
            .unwrap();
        assert_eq!(resolved.left, DataType::Array);

        let resolved = registry
            .resolve_binary("pick", DataType::String, DataType::Scalar)
            .unwrap();
        assert_eq!(resolved.left, DataType::Any);
    }

    #[test]
    fn duplicate_overload_is_rejected() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_unary("probe", DataType::Scalar, "", noop_unary())
            .unwrap();
        let err = registry
            .register_unary("PROBE", DataType::Scalar, "", noop_unary())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOverload { arity: 1, .. }));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_unary("typeName", DataType::Any, "", noop_unary())
            .unwrap();
        assert!(registry.has_unary("TYPENAME"));
        assert!(registry.resolve_unary("typename", DataType::Scalar).is_some());
    }

    #[test]
    fn nil_operand_matches_declared_nothing() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_unary("probe", DataType::Nothing, "", noop_unary())
            .unwrap();
        assert!(registry.resolve_unary("probe", DataType::Nothing).is_some());
        assert!(registry.resolve_unary("probe", DataType::Scalar).is_none());
    }
}
