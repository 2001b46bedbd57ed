//! Variable scopes and the long-lived namespace layer.
//!
//! A [`Scope`] is the per-frame bindings table; it stacks with the call
//! stack. A [`Namespace`] is a VM-lifetime bindings table; four of them
//! exist and every context points at one of them as its "non-local
//! backing". Non-local names are case-insensitive, local (`_`-prefixed)
//! names are case-sensitive.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// Whether a name is local, deciding how it is resolved and compared.
pub fn is_local_name(name: &str) -> bool {
    name.starts_with('_')
}

fn names_match(bound: &str, requested: &str) -> bool {
    if is_local_name(requested) {
        bound == requested
    } else {
        bound.eq_ignore_ascii_case(requested)
    }
}

/// A linear list of bindings with insertion order preserved.
///
/// Scopes also carry an optional name, set by the `scopeName` operator and
/// consumed by `breakOut`.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: Vec<(Rc<str>, Value)>,
    name: Option<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(bound, _)| names_match(bound, name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name`, overwriting an existing binding in place so insertion
    /// order stays stable.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self
            .bindings
            .iter_mut()
            .find(|(bound, _)| names_match(bound, name))
        {
            slot.1 = value;
        } else {
            self.bindings.push((Rc::from(name), value));
        }
    }

    pub fn scope_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_scope_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn bindings(&self) -> &[(Rc<str>, Value)] {
        &self.bindings
    }
}

/// The four recognized namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Mission,
    Ui,
    Parsing,
    Profile,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 4] = [
        NamespaceKind::Mission,
        NamespaceKind::Ui,
        NamespaceKind::Parsing,
        NamespaceKind::Profile,
    ];
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NamespaceKind::Mission => "missionNamespace",
            NamespaceKind::Ui => "uiNamespace",
            NamespaceKind::Parsing => "parsingNamespace",
            NamespaceKind::Profile => "profileNamespace",
        };
        write!(f, "{}", name)
    }
}

/// A VM-lifetime key→value map backing all non-local variables.
///
/// Keys are stored lowercased; iteration order is insertion order, which
/// keeps message traces deterministic.
#[derive(Debug, Clone)]
pub struct Namespace {
    kind: NamespaceKind,
    values: IndexMap<String, Value>,
}

impl Namespace {
    pub fn new(kind: NamespaceKind) -> Self {
        Self {
            kind,
            values: IndexMap::new(),
        }
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_ascii_lowercase())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_local_lookup_is_case_insensitive() {
        let mut scope = Scope::new();
        scope.set("Foo", Value::Scalar(1.0));
        assert_eq!(scope.get("foo"), Some(&Value::Scalar(1.0)));
        assert_eq!(scope.get("FOO"), Some(&Value::Scalar(1.0)));
    }

    #[test]
    fn local_lookup_is_case_sensitive() {
        let mut scope = Scope::new();
        scope.set("_foo", Value::Scalar(1.0));
        assert_eq!(scope.get("_foo"), Some(&Value::Scalar(1.0)));
        assert_eq!(scope.get("_Foo"), None);
    }

    #[test]
    fn namespace_keys_fold_case() {
        let mut ns = Namespace::new(NamespaceKind::Mission);
        ns.set("Counter", Value::Scalar(3.0));
        assert_eq!(ns.get("counter"), Some(&Value::Scalar(3.0)));
        ns.set("COUNTER", Value::Scalar(4.0));
        assert_eq!(ns.get("Counter"), Some(&Value::Scalar(4.0)));
    }

    #[test]
    fn overwrite_keeps_insertion_order() {
        let mut scope = Scope::new();
        scope.set("a", Value::Scalar(1.0));
        scope.set("b", Value::Scalar(2.0));
        scope.set("A", Value::Scalar(3.0));
        let names: Vec<&str> = scope.bindings().iter().map(|(n, _)| n.as_ref()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
