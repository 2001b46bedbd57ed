//! The flat instruction set the compiler produces and the VM executes.
//!
//! Opcodes form a small closed set; every other behavior of the runtime is
//! expressed through the operator registry rather than through new opcodes.
//! Instruction sets are immutable after construction and can be embedded in
//! values (a code value *is* a shared instruction set).

use std::fmt;
use std::rc::Rc;

use crate::diagnostic::DiagInfo;
use crate::value::Value;

/// A single opcode with its immutable operands.
///
/// The VM interprets these with a `match` per step. Operator calls carry the
/// operator *name*; resolution against the registry happens at execution
/// time using the runtime types of the popped operands.
#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    /// Push a literal value onto the active frame's value stack.
    Push(Value),

    /// Pop `n` values and push an array of them in bottom-to-top order.
    MakeArray(usize),

    /// Resolve a variable (scope chain for `_`-locals, namespace otherwise)
    /// and push its value; unset names push nil with a warning.
    GetVariable(Rc<str>),

    /// Pop one value and write it to the first scope, searched innermost to
    /// outermost, that already binds the name; non-local names go to the
    /// surrounding namespace instead.
    AssignTo(Rc<str>),

    /// Pop one value and bind it in the innermost scope unconditionally.
    AssignToLocal(Rc<str>),

    /// Look up a nular operator and push its result.
    CallNular(Rc<str>),

    /// Pop the right operand, dispatch a unary operator on its type, push
    /// the result.
    CallUnary(Rc<str>),

    /// Pop right then left, dispatch a binary operator on both types, push
    /// the result. The precedence is informational; it is only consulted
    /// when reconstructing source form.
    CallBinary(Rc<str>, u8),

    /// Clear the frame's value stack back to its start-of-statement mark.
    EndStatement,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Push(v) => write!(f, "PUSH {}", v.to_source()),
            OpCode::MakeArray(n) => write!(f, "MAKE_ARRAY {}", n),
            OpCode::GetVariable(name) => write!(f, "GET_VARIABLE {}", name),
            OpCode::AssignTo(name) => write!(f, "ASSIGN_TO {}", name),
            OpCode::AssignToLocal(name) => write!(f, "ASSIGN_TO_LOCAL {}", name),
            OpCode::CallNular(name) => write!(f, "CALL_NULAR {}", name),
            OpCode::CallUnary(name) => write!(f, "CALL_UNARY {}", name),
            OpCode::CallBinary(name, prec) => write!(f, "CALL_BINARY {} {}", name, prec),
            OpCode::EndStatement => write!(f, "END_STATEMENT"),
        }
    }
}

/// One emitted instruction: an opcode plus the source position it came from.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub diag: DiagInfo,
}

impl Instruction {
    pub fn new(op: OpCode, diag: DiagInfo) -> Self {
        Self { op, diag }
    }
}

impl PartialEq for Instruction {
    /// Diagnostic info is carried along but never part of identity.
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op
    }
}

/// An ordered, immutable sequence of instructions together with the source
/// window that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSet {
    instructions: Vec<Instruction>,
    source: Rc<str>,
    path: Rc<str>,
}

impl InstructionSet {
    pub fn new(instructions: Vec<Instruction>, source: Rc<str>, path: Rc<str>) -> Self {
        Self {
            instructions,
            source,
            path,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn source(&self) -> &Rc<str> {
        &self.source
    }

    pub fn path(&self) -> &Rc<str> {
        &self.path
    }

    /// Rebuild a source-form string from the instruction stream.
    ///
    /// Used by diagnostics and by the source form of code values. Works a
    /// sliding cursor over the instructions, maintaining a small expression
    /// stack; `CallBinary` precedences decide where parentheses are needed.
    pub fn reconstruct(&self) -> String {
        // (rendered text, precedence of its outermost operator; atoms are 10)
        let mut exprs: Vec<(String, u8)> = Vec::new();
        let mut statements: Vec<String> = Vec::new();

        let mut flush = |exprs: &mut Vec<(String, u8)>, statements: &mut Vec<String>| {
            for (text, _) in exprs.drain(..) {
                statements.push(text);
            }
        };

        for inst in &self.instructions {
            match &inst.op {
                OpCode::Push(v) => exprs.push((v.to_source(), 10)),
                OpCode::MakeArray(n) => {
                    let at = exprs.len().saturating_sub(*n);
                    let items: Vec<String> =
                        exprs.drain(at..).map(|(text, _)| text).collect();
                    exprs.push((format!("[{}]", items.join(", ")), 10));
                }
                OpCode::GetVariable(name) => exprs.push((name.to_string(), 10)),
                OpCode::AssignTo(name) | OpCode::AssignToLocal(name) => {
                    let (value, _) = exprs.pop().unwrap_or_default();
                    let keyword = if matches!(inst.op, OpCode::AssignToLocal(_)) {
                        "private "
                    } else {
                        ""
                    };
                    statements.push(format!("{}{} = {}", keyword, name, value));
                }
                OpCode::CallNular(name) => exprs.push((name.to_string(), 10)),
                OpCode::CallUnary(name) => {
                    let (right, _) = exprs.pop().unwrap_or_default();
                    exprs.push((format!("{} {}", name, right), 9));
                }
                OpCode::CallBinary(name, prec) => {
                    let (right, right_prec) = exprs.pop().unwrap_or_default();
                    let (left, left_prec) = exprs.pop().unwrap_or_default();
                    let left = parenthesize(left, left_prec < *prec);
                    let right = parenthesize(right, right_prec <= *prec && right_prec != 10);
                    exprs.push((format!("{} {} {}", left, name, right), *prec));
                }
                OpCode::EndStatement => flush(&mut exprs, &mut statements),
            }
        }
        flush(&mut exprs, &mut statements);
        statements.join("; ")
    }
}

fn parenthesize(text: String, needed: bool) -> String {
    if needed { format!("({})", text) } else { text }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(op: OpCode) -> Instruction {
        Instruction::new(op, DiagInfo::default())
    }

    fn set(ops: Vec<OpCode>) -> InstructionSet {
        InstructionSet::new(
            ops.into_iter().map(inst).collect(),
            Rc::from(""),
            Rc::from("test.tac"),
        )
    }

    #[test]
    fn reconstructs_precedence_with_parentheses() {
        // (1 + 2) * 3 lowered as: 1 2 + 3 *
        let s = set(vec![
            OpCode::Push(Value::Scalar(1.0)),
            OpCode::Push(Value::Scalar(2.0)),
            OpCode::CallBinary(Rc::from("+"), 6),
            OpCode::Push(Value::Scalar(3.0)),
            OpCode::CallBinary(Rc::from("*"), 7),
        ]);
        assert_eq!(s.reconstruct(), "(1 + 2) * 3");
    }

    #[test]
    fn reconstructs_assignment_and_array() {
        let s = set(vec![
            OpCode::Push(Value::Scalar(1.0)),
            OpCode::Push(Value::Scalar(2.0)),
            OpCode::MakeArray(2),
            OpCode::AssignTo(Rc::from("xs")),
        ]);
        assert_eq!(s.reconstruct(), "xs = [1, 2]");
    }

    #[test]
    fn end_statement_separates_statements() {
        let s = set(vec![
            OpCode::Push(Value::Scalar(1.0)),
            OpCode::AssignTo(Rc::from("a")),
            OpCode::EndStatement,
            OpCode::GetVariable(Rc::from("a")),
        ]);
        assert_eq!(s.reconstruct(), "a = 1; a");
    }

    #[test]
    fn instruction_identity_ignores_diag_info() {
        let a = Instruction::new(
            OpCode::EndStatement,
            DiagInfo::new("a.tac".into(), 1, 1, 0, "".into()),
        );
        let b = Instruction::new(
            OpCode::EndStatement,
            DiagInfo::new("b.tac".into(), 9, 9, 99, "x".into()),
        );
        assert_eq!(a, b);
    }
}
