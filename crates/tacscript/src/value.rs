//! Tagged runtime values.
//!
//! A [`Value`] is a cheap-to-clone handle to a type tag and a payload.
//! Composite payloads (arrays, code) are reference counted and shared:
//! copying a value at the language level never copies the storage, so two
//! copies of an array observe each other's mutations. Mutation itself only
//! happens through operators (`set`, `pushBack`); the handles are immutable.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::instruction::InstructionSet;
use crate::scope::NamespaceKind;

/// The closed set of runtime type tags.
///
/// `Any` is a dispatch wildcard used in operator registrations; no runtime
/// value ever carries it. `If`/`While`/`For`/`Switch` tag the control-flow
/// marker values that exist solely to route operator overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Nothing,
    Any,
    Scalar,
    Boolean,
    String,
    Array,
    Code,
    If,
    While,
    For,
    Switch,
    Config,
    Namespace,
    Side,
    Group,
    Object,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Nothing => "NOTHING",
            DataType::Any => "ANY",
            DataType::Scalar => "SCALAR",
            DataType::Boolean => "BOOLEAN",
            DataType::String => "STRING",
            DataType::Array => "ARRAY",
            DataType::Code => "CODE",
            DataType::If => "IF",
            DataType::While => "WHILE",
            DataType::For => "FOR",
            DataType::Switch => "SWITCH",
            DataType::Config => "CONFIG",
            DataType::Namespace => "NAMESPACE",
            DataType::Side => "SIDE",
            DataType::Group => "GROUP",
            DataType::Object => "OBJECT",
        };
        write!(f, "{}", name)
    }
}

/// A faction side handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    West,
    East,
    Independent,
    Civilian,
    Unknown,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Side::West => "WEST",
            Side::East => "EAST",
            Side::Independent => "INDEPENDENT",
            Side::Civilian => "CIVILIAN",
            Side::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Mutable state of a `for`-construct under assembly.
///
/// Built up by the `for`/`from`/`to`/`step` operator pipeline before `do`
/// turns it into a running loop frame. `to` stays unset until the script
/// provides it; a loop whose end was never given runs zero iterations.
#[derive(Debug, Clone)]
pub struct ForSetup {
    pub var: String,
    pub from: f64,
    pub to: Option<f64>,
    pub step: f64,
}

impl ForSetup {
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            from: 0.0,
            to: None,
            step: 1.0,
        }
    }
}

/// Shared storage behind an `Array` value.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A runtime value: one payload variant per type tag.
#[derive(Debug, Clone)]
pub enum Value {
    Nothing,
    Scalar(f64),
    Boolean(bool),
    String(Rc<str>),
    Array(ArrayRef),
    Code(Rc<InstructionSet>),
    /// Outcome of the `if` operator, consumed by `then`.
    If(bool),
    /// Condition code marked by the `while` operator, consumed by `do`.
    While(Rc<InstructionSet>),
    /// Loop setup built by `for`/`from`/`to`/`step`, consumed by `do`.
    For(Rc<RefCell<ForSetup>>),
    /// Subject of a `switch` (or the candidate of a `case`), consumed by
    /// `do` and `:` respectively.
    Switch(Rc<Value>),
    Config(Rc<str>),
    Namespace(NamespaceKind),
    Side(Side),
    Group(Rc<str>),
    Object(Rc<str>),
}

/// Tolerance for scalar comparisons.
const SCALAR_EPSILON: f64 = 1e-9;

impl Value {
    pub fn nil() -> Self {
        Value::Nothing
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Nothing => DataType::Nothing,
            Value::Scalar(_) => DataType::Scalar,
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array,
            Value::Code(_) => DataType::Code,
            Value::If(_) => DataType::If,
            Value::While(_) => DataType::While,
            Value::For(_) => DataType::For,
            Value::Switch(_) => DataType::Switch,
            Value::Config(_) => DataType::Config,
            Value::Namespace(_) => DataType::Namespace,
            Value::Side(_) => DataType::Side,
            Value::Group(_) => DataType::Group,
            Value::Object(_) => DataType::Object,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&Rc<InstructionSet>> {
        match self {
            Value::Code(set) => Some(set),
            _ => None,
        }
    }

    /// Truthiness as the control-flow operators see it: only an actual
    /// `true` boolean is truthy; everything else (including nil from a
    /// failed condition) is not.
    pub fn truthy(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    /// Round-trippable source form of the value.
    ///
    /// Integer-valued scalars print without a decimal point; strings use
    /// `""` doubling for embedded quotes; code reconstructs its instruction
    /// set back into source between braces.
    pub fn to_source(&self) -> String {
        match self {
            Value::Nothing => "nil".to_string(),
            Value::Scalar(n) => format_scalar(*n),
            Value::Boolean(b) => b.to_string(),
            Value::String(s) => format!("\"{}\"", s.replace('"', "\"\"")),
            Value::Array(items) => {
                let inner: Vec<String> = items.borrow().iter().map(Value::to_source).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Code(set) => format!("{{{}}}", set.reconstruct()),
            Value::If(b) => format!("if {}", b),
            Value::While(set) => format!("while {{{}}}", set.reconstruct()),
            Value::For(setup) => format!("for \"{}\"", setup.borrow().var),
            Value::Switch(inner) => format!("switch {}", inner.to_source()),
            Value::Config(path) => format!("config \"{}\"", path),
            Value::Namespace(kind) => kind.to_string(),
            Value::Side(side) => side.to_string(),
            Value::Group(name) => format!("group \"{}\"", name),
            Value::Object(name) => format!("object \"{}\"", name),
        }
    }
}

/// Scalars print without a decimal point when they hold an integer.
fn format_scalar(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    /// Structural equality with a 1e-9 tolerance on scalars, elementwise on
    /// arrays, identity on code. Shared-storage arrays short-circuit on
    /// pointer identity so self-containing arrays compare to themselves.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Scalar(a), Value::Scalar(b)) => {
                (a - b).abs() <= SCALAR_EPSILON || (a.is_nan() && b.is_nan())
            }
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
                }
            }
            (Value::Code(a), Value::Code(b)) => Rc::ptr_eq(a, b),
            (Value::If(a), Value::If(b)) => a == b,
            (Value::While(a), Value::While(b)) => Rc::ptr_eq(a, b),
            (Value::For(a), Value::For(b)) => Rc::ptr_eq(a, b),
            (Value::Switch(a), Value::Switch(b)) => a.as_ref() == b.as_ref(),
            (Value::Config(a), Value::Config(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::Side(a), Value::Side(b)) => a == b,
            (Value::Group(a), Value::Group(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_source())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_equality_uses_epsilon() {
        assert_eq!(Value::Scalar(1.0), Value::Scalar(1.0 + 1e-12));
        assert_ne!(Value::Scalar(1.0), Value::Scalar(1.0 + 1e-6));
    }

    #[test]
    fn integer_scalars_print_without_decimal_point() {
        assert_eq!(Value::Scalar(4.0).to_source(), "4");
        assert_eq!(Value::Scalar(2.5).to_source(), "2.5");
        assert_eq!(Value::Scalar(-3.0).to_source(), "-3");
    }

    #[test]
    fn string_source_form_doubles_quotes() {
        assert_eq!(Value::string("a\"b").to_source(), "\"a\"\"b\"");
    }

    #[test]
    fn array_copies_share_storage() {
        let a = Value::array(vec![Value::Scalar(1.0)]);
        let b = a.clone();
        if let Value::Array(items) = &a {
            items.borrow_mut().push(Value::Scalar(2.0));
        }
        assert_eq!(b, Value::array(vec![Value::Scalar(1.0), Value::Scalar(2.0)]));
    }

    #[test]
    fn self_containing_array_compares_to_itself() {
        let a = Value::array(vec![]);
        if let Value::Array(items) = &a {
            items.borrow_mut().push(a.clone());
        }
        assert_eq!(a, a.clone());
    }

    #[test]
    fn only_true_is_truthy() {
        assert!(Value::Boolean(true).truthy());
        assert!(!Value::Boolean(false).truthy());
        assert!(!Value::Scalar(1.0).truthy());
        assert!(!Value::Nothing.truthy());
    }
}
