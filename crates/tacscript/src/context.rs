//! Execution contexts: one logical script thread each.
//!
//! A context owns a stack of [`Frame`]s plus the bookkeeping the scheduler
//! needs (budgets, suspension, cancellation). The frame pop protocol lives
//! here because specialized frames push siblings and children onto the
//! context when they finish.

use std::rc::Rc;
use std::time::Instant;

use crate::frame::{Frame, FrameKind, FrameSnapshot};
use crate::instruction::InstructionSet;
use crate::scope::NamespaceKind;
use crate::value::Value;

/// Identifies a context within its VM.
pub type ContextId = u64;

/// Scheduler-visible state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Runnable,
    /// Waiting for a wake-up time; not scheduled until it passes.
    Suspended,
    Done,
    Failed,
}

/// Why a context ended abnormally.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    MaxInstructions(u64),
    TimedOut,
    UncaughtException(String),
    Cancelled,
    Internal(String),
}

/// A logical script thread: a frame stack plus scheduling state.
#[derive(Debug)]
pub struct Context {
    pub(crate) id: ContextId,
    pub(crate) frames: Vec<Frame>,
    pub(crate) namespace: NamespaceKind,
    pub(crate) steps: u64,
    pub(crate) max_steps: Option<u64>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) wake_at: Option<Instant>,
    pub(crate) cancelled: bool,
    pub(crate) state: ContextState,
    pub(crate) result: Value,
    pub(crate) failure: Option<Vec<FrameSnapshot>>,
    pub(crate) failure_reason: Option<FailureReason>,
}

impl Context {
    pub(crate) fn new(id: ContextId, instructions: Rc<InstructionSet>) -> Self {
        Self {
            id,
            frames: vec![Frame::new(instructions)],
            namespace: NamespaceKind::Mission,
            steps: 0,
            max_steps: None,
            deadline: None,
            wake_at: None,
            cancelled: false,
            state: ContextState::Runnable,
            result: Value::Nothing,
            failure: None,
            failure_reason: None,
        }
    }

    /// An inert stand-in used while a real context is moved out for a step.
    pub(crate) fn placeholder() -> Self {
        let empty = Rc::new(InstructionSet::new(Vec::new(), Rc::from(""), Rc::from("")));
        let mut context = Self::new(ContextId::MAX, empty);
        context.frames.clear();
        context.state = ContextState::Done;
        context
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Final value of the context once it is done.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Steps executed so far (instructions plus frame transitions).
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The namespace backing non-local variables of this context.
    pub fn namespace(&self) -> NamespaceKind {
        self.namespace
    }

    pub fn set_namespace(&mut self, kind: NamespaceKind) {
        self.namespace = kind;
    }

    /// Frame stack captured at the point of abnormal termination, top last.
    pub fn failure_trace(&self) -> Option<&[FrameSnapshot]> {
        self.failure.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.failure_reason.as_ref()
    }

    /// Suspend this context until `duration` has elapsed.
    pub fn suspend_for(&mut self, duration: std::time::Duration) {
        self.wake_at = Some(Instant::now() + duration);
        self.state = ContextState::Suspended;
    }

    /// Unwind every frame and mark the context failed for `reason`.
    pub fn fail(&mut self, reason: FailureReason) {
        self.failure_reason = Some(reason);
        self.unwind(ContextState::Failed);
    }

    /// The active frame, if any. Operator handlers use this to reach
    /// kind-specific frame state (switch case registration, for example).
    pub fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Push a value onto the active frame's value stack.
    pub fn push_value(&mut self, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.values.push(value);
        }
    }

    pub fn pop_value(&mut self) -> Value {
        self.frames
            .last_mut()
            .and_then(|frame| frame.values.pop())
            .unwrap_or(Value::Nothing)
    }

    /// Push a fresh child frame executing `instructions`.
    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Look a local name up across the frame scopes, innermost first.
    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.scope.get(name))
    }

    /// Overwrite the innermost existing binding of `name`. Returns false if
    /// no scope on the stack binds it.
    pub fn assign_existing(&mut self, name: &str, value: Value) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if frame.scope.contains(name) {
                frame.scope.set(name, value);
                return true;
            }
        }
        false
    }

    /// Bind `name` in the innermost scope, shadowing outer bindings.
    pub fn set_local(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scope.set(name, value);
        }
    }

    /// True if any scope on the frame stack binds `name`.
    pub fn has_local(&self, name: &str) -> bool {
        self.frames.iter().any(|frame| frame.scope.contains(name))
    }

    /// Tag the active frame's scope for `breakOut`.
    pub fn name_current_scope(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scope.set_scope_name(name);
        }
    }

    /// Unwind until the named frame is on top, pop it, and deliver `value`
    /// as its result. Returns false when no frame carries the name.
    pub fn break_out(&mut self, scope_name: &str, value: Value) -> bool {
        let Some(index) = self
            .frames
            .iter()
            .rposition(|frame| frame.scope.scope_name() == Some(scope_name))
        else {
            return false;
        };
        self.frames.truncate(index + 1);
        self.frames.pop();
        match self.frames.last_mut() {
            Some(parent) => parent.values.push(value),
            None => {
                self.result = value;
                self.state = ContextState::Done;
            }
        }
        true
    }

    /// Unwind to the nearest try-annotated frame and resume in its handler
    /// with `_exception` bound. Returns false when no handler exists.
    pub fn throw_to_handler(&mut self, exception: Value) -> bool {
        let Some(index) = self
            .frames
            .iter()
            .rposition(|frame| matches!(frame.kind, FrameKind::Try { .. }))
        else {
            return false;
        };
        self.frames.truncate(index + 1);
        let frame = self.frames.last_mut().expect("handler frame present");
        let FrameKind::Try { handler } = std::mem::replace(&mut frame.kind, FrameKind::Plain)
        else {
            unreachable!("frame at handler index is a try frame");
        };
        frame.instructions = handler;
        frame.ip = 0;
        frame.values.clear();
        frame.scope.set("_exception", exception);
        true
    }

    /// Drop every frame, capturing a snapshot for post-mortem display.
    pub(crate) fn unwind(&mut self, state: ContextState) {
        self.failure = Some(self.frames.iter().map(Frame::snapshot).collect());
        self.frames.clear();
        self.state = state;
    }

    /// Apply the pop protocol to an exhausted top frame.
    ///
    /// Plain frames propagate their final value to the parent; specialized
    /// frames re-push bodies or execute their selected branch. Counts as
    /// one scheduler step so that empty loop bodies still consume budget.
    pub(crate) fn finish_top_frame(&mut self) {
        enum Action {
            PopPlain,
            PushChild(Frame),
            PopWith(Value),
        }

        let action = {
            let Some(frame) = self.frames.last_mut() else {
                self.state = ContextState::Done;
                return;
            };
            match &mut frame.kind {
                FrameKind::Plain | FrameKind::Try { .. } => Action::PopPlain,

                FrameKind::While { body, last } => {
                    // Stack layout here: [body result from the previous
                    // iteration (if any), condition result].
                    let cond = frame.values.pop();
                    if let Some(previous) = frame.values.pop() {
                        *last = Some(previous);
                    }
                    frame.values.clear();
                    if cond.is_some_and(|value| value.truthy()) {
                        frame.ip = 0;
                        Action::PushChild(Frame::new(body.clone()))
                    } else {
                        Action::PopWith(last.take().unwrap_or(Value::Nothing))
                    }
                }

                FrameKind::For {
                    var,
                    to,
                    step,
                    body,
                    current,
                    last,
                } => {
                    if let Some(previous) = frame.values.pop() {
                        *last = Some(previous);
                    }
                    frame.values.clear();
                    let done =
                        (*step >= 0.0 && *current > *to) || (*step < 0.0 && *current < *to);
                    if done {
                        Action::PopWith(last.take().unwrap_or(Value::Nothing))
                    } else {
                        let mut child = Frame::new(body.clone());
                        child.scope.set(var, Value::Scalar(*current));
                        *current += *step;
                        Action::PushChild(child)
                    }
                }

                FrameKind::Switch {
                    matched,
                    default_code,
                    executing,
                    ..
                } => {
                    if *executing {
                        Action::PopWith(frame.values.last().cloned().unwrap_or(Value::Nothing))
                    } else {
                        frame.values.clear();
                        match matched.clone().or_else(|| default_code.clone()) {
                            Some(code) => {
                                *executing = true;
                                Action::PushChild(Frame::new(code))
                            }
                            None => Action::PopWith(Value::Nothing),
                        }
                    }
                }
            }
        };

        match action {
            Action::PopPlain => {
                let frame = self.frames.pop().expect("frame just inspected");
                let result = if frame.discard_result {
                    None
                } else {
                    frame.values.last().cloned()
                };
                match self.frames.last_mut() {
                    Some(parent) => {
                        if let Some(value) = result {
                            parent.values.push(value);
                        }
                    }
                    None => {
                        self.result = result.unwrap_or(Value::Nothing);
                        self.state = ContextState::Done;
                    }
                }
            }
            Action::PushChild(child) => self.frames.push(child),
            Action::PopWith(value) => {
                self.frames.pop();
                self.deliver(value);
            }
        }
    }

    /// Push a frame result to the parent, or finish the context with it.
    fn deliver(&mut self, value: Value) {
        match self.frames.last_mut() {
            Some(parent) => parent.values.push(value),
            None => {
                self.result = value;
                self.state = ContextState::Done;
            }
        }
    }
}
