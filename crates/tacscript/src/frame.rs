//! Call frames and their control-flow specializations.
//!
//! Control flow in this runtime is a data-structure protocol on frames, not
//! compiled branches: a `while` is a frame that re-pushes its body as long
//! as its condition holds, a `for` counts an index between bounds, a
//! `switch` collects its cases while the body runs and then executes the
//! match. This keeps every construct steppable at instruction granularity.

use std::rc::Rc;

use crate::instruction::InstructionSet;
use crate::scope::Scope;
use crate::value::Value;

/// What kind of frame this is, with kind-specific state.
#[derive(Debug, Clone)]
pub enum FrameKind {
    Plain,

    /// The frame's own instruction set is the loop condition; `body` is
    /// pushed as a fresh child frame after every truthy evaluation. `last`
    /// remembers the most recent body result, which becomes the loop's
    /// value when the condition finally fails.
    While {
        body: Rc<InstructionSet>,
        last: Option<Value>,
    },

    /// Counting loop. The frame itself carries no instructions; each pass
    /// of the pop protocol either pushes a body child (with the index bound
    /// in the child's scope) or terminates. Termination is
    /// `(step >= 0 && current > to) || (step < 0 && current < to)`.
    For {
        var: Rc<str>,
        to: f64,
        step: f64,
        body: Rc<InstructionSet>,
        current: f64,
        last: Option<Value>,
    },

    /// The frame's own instruction set is the switch body; `case` and `:`
    /// operators executing inside it register the matched code here. Once
    /// the body is exhausted the match (or the default) runs as a child and
    /// its value becomes the switch result.
    Switch {
        subject: Value,
        matched: Option<Rc<InstructionSet>>,
        default_code: Option<Rc<InstructionSet>>,
        executing: bool,
    },

    /// A plain frame annotated with a catch handler; `throw` unwinds to the
    /// nearest one of these.
    Try { handler: Rc<InstructionSet> },
}

/// One entry in a context's call stack.
///
/// Each frame owns its value stack and its variable scope; name resolution
/// and outward assignment walk the frame stack, so scopes stack linearly
/// with nested blocks and calls.
#[derive(Debug, Clone)]
pub struct Frame {
    pub instructions: Rc<InstructionSet>,
    pub ip: usize,
    pub values: Vec<Value>,
    pub scope: Scope,
    pub kind: FrameKind,
    /// When set, the frame's final value is dropped instead of being pushed
    /// onto the parent's value stack.
    pub discard_result: bool,
}

impl Frame {
    pub fn new(instructions: Rc<InstructionSet>) -> Self {
        Self {
            instructions,
            ip: 0,
            values: Vec::new(),
            scope: Scope::new(),
            kind: FrameKind::Plain,
            discard_result: false,
        }
    }

    pub fn with_kind(instructions: Rc<InstructionSet>, kind: FrameKind) -> Self {
        Self {
            kind,
            ..Self::new(instructions)
        }
    }

    /// A frame whose instruction pointer has run past its last instruction
    /// is terminal: the next step applies the pop protocol instead of
    /// fetching.
    pub fn is_exhausted(&self) -> bool {
        self.ip >= self.instructions.len()
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            scope_name: self.scope.scope_name().map(str::to_string),
            ip: self.ip,
            len: self.instructions.len(),
            instruction: self
                .instructions
                .get(self.ip.saturating_sub(1))
                .map(|inst| inst.op.to_string()),
        }
    }
}

/// A frozen view of one frame, captured when a context dies abnormally.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub scope_name: Option<String>,
    pub ip: usize,
    pub len: usize,
    /// The most recently executed instruction, rendered.
    pub instruction: Option<String>,
}
