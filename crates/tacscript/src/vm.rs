//! The virtual machine: executor loop, cooperative scheduler, embedder API.
//!
//! A `Vm` owns the operator registry, the four namespaces, the runtime
//! message log, and any number of contexts (one per logical script). The
//! scheduler is single-threaded and cooperative: each call to [`Vm::step`]
//! executes exactly one step of exactly one context, rotating round-robin
//! over the runnable ones, so interleaving is at instruction granularity
//! and fully deterministic.

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::builtins;
use crate::compiler::Compiler;
use crate::context::{Context, ContextId, ContextState, FailureReason};
use crate::diagnostic::{DiagInfo, RuntimeMessage, Severity, msg};
use crate::error::{Error, Result};
use crate::instruction::{InstructionSet, OpCode};
use crate::parser;
use crate::registry::{BinaryHandler, NularHandler, OperatorRegistry, UnaryHandler};
use crate::scope::{Namespace, NamespaceKind, is_local_name};
use crate::value::{DataType, Value};

/// Resource limits applied to newly created contexts.
///
/// `None` means unlimited. Exhaustion unwinds the offending context only;
/// the VM and its other contexts keep running.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    /// Maximum steps (instructions plus frame transitions) per context.
    pub max_steps: Option<u64>,
    /// Wall-clock budget per context, measured from creation.
    pub max_runtime: Option<Duration>,
}

/// The virtual machine.
pub struct Vm {
    registry: OperatorRegistry,
    namespaces: [Namespace; 4],
    contexts: Vec<Context>,
    next_context_id: ContextId,
    schedule_cursor: usize,
    limits: Limits,
    messages: Vec<RuntimeMessage>,
    /// Diagnostic info of the instruction currently executing; attached to
    /// every message reported during its execution.
    current_diag: Option<DiagInfo>,
}

fn namespace_slot(kind: NamespaceKind) -> usize {
    match kind {
        NamespaceKind::Mission => 0,
        NamespaceKind::Ui => 1,
        NamespaceKind::Parsing => 2,
        NamespaceKind::Profile => 3,
    }
}

impl Vm {
    /// Create a VM with the built-in operator library installed.
    pub fn new() -> Self {
        let mut registry = OperatorRegistry::new();
        builtins::install(&mut registry).expect("built-in operator table is duplicate-free");
        Self {
            registry,
            namespaces: [
                Namespace::new(NamespaceKind::Mission),
                Namespace::new(NamespaceKind::Ui),
                Namespace::new(NamespaceKind::Parsing),
                Namespace::new(NamespaceKind::Profile),
            ],
            contexts: Vec::new(),
            next_context_id: 0,
            schedule_cursor: 0,
            limits: Limits::default(),
            messages: Vec::new(),
            current_diag: None,
        }
    }

    // -----------------------------------------------------------------------
    // Embedder API: operators, namespaces, messages
    // -----------------------------------------------------------------------

    pub fn register_nular(
        &mut self,
        name: &str,
        description: &'static str,
        handler: NularHandler,
    ) -> Result<()> {
        self.registry.register_nular(name, description, handler)
    }

    pub fn register_unary(
        &mut self,
        name: &str,
        right: DataType,
        description: &'static str,
        handler: UnaryHandler,
    ) -> Result<()> {
        self.registry.register_unary(name, right, description, handler)
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
        self.registry
            .register_binary(name, precedence, left, right, description, handler)
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn namespace(&self, kind: NamespaceKind) -> &Namespace {
        &self.namespaces[namespace_slot(kind)]
    }

    pub fn namespace_mut(&mut self, kind: NamespaceKind) -> &mut Namespace {
        &mut self.namespaces[namespace_slot(kind)]
    }

    /// Ordered log of everything the runtime has reported so far.
    pub fn messages(&self) -> &[RuntimeMessage] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<RuntimeMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Append a keyed message, attaching the diagnostic info of the
    /// instruction currently executing (if any).
    pub fn report(&mut self, key: &'static str, severity: Severity, text: impl Into<String>) {
        let mut message = RuntimeMessage::new(key, severity, text);
        if let Some(diag) = &self.current_diag {
            message = message.with_diag(diag.clone());
        }
        self.messages.push(message);
    }

    // -----------------------------------------------------------------------
    // Embedder API: parsing and contexts
    // -----------------------------------------------------------------------

    /// Parse source text into an instruction set.
    ///
    /// `path` is carried into every instruction's diagnostic info. Parse
    /// failures are fatal for the compile; assembly-level oddities (numbers
    /// out of range, unknown operator names) are logged and compilation
    /// continues.
    pub fn parse(&mut self, source: &str, path: &str) -> Result<Rc<InstructionSet>> {
        let script = parser::parse(source, path)?;
        let set = Compiler::lower(&self.registry, &mut self.messages, &script, source, path);
        Ok(Rc::new(set))
    }

    /// Load an instruction set into a fresh context and return its id.
    ///
    /// The context starts runnable with the VM's current [`Limits`].
    pub fn create_context(&mut self, instructions: Rc<InstructionSet>) -> ContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        let mut context = Context::new(id, instructions);
        context.max_steps = self.limits.max_steps;
        context.deadline = self.limits.max_runtime.map(|budget| Instant::now() + budget);
        self.contexts.push(context);
        id
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        self.contexts.iter().find(|context| context.id() == id)
    }

    pub fn context_state(&self, id: ContextId) -> Option<ContextState> {
        self.context(id).map(Context::state)
    }

    /// Request cancellation; honored between steps without firing any
    /// operator.
    pub fn cancel(&mut self, id: ContextId) -> bool {
        match self.contexts.iter_mut().find(|context| context.id() == id) {
            Some(context) => {
                context.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// The finished value of a context, or the error that ended it.
    pub fn context_outcome(&self, id: ContextId) -> Result<Value> {
        let context = self.context(id).ok_or(Error::UnknownContext(id))?;
        match context.state() {
            ContextState::Done => Ok(context.result().clone()),
            ContextState::Failed => Err(match context.failure_reason() {
                Some(FailureReason::MaxInstructions(limit)) => Error::MaxInstructions(*limit),
                Some(FailureReason::TimedOut) => Error::ScriptTimedOut,
                Some(FailureReason::UncaughtException(text)) => {
                    Error::UncaughtException(text.clone())
                }
                Some(FailureReason::Cancelled) => Error::ContextFailed("cancelled".to_string()),
                Some(FailureReason::Internal(text)) => Error::InternalInvariant(text.clone()),
                None => Error::ContextFailed("no failure reason recorded".to_string()),
            }),
            ContextState::Runnable | ContextState::Suspended => {
                Err(Error::ContextFailed("context has not finished".to_string()))
            }
        }
    }

    /// Parse, load, and run a script to completion; namespaces persist
    /// across calls.
    pub fn eval(&mut self, source: &str) -> Result<Value> {
        let set = self.parse(source, "<eval>")?;
        let id = self.create_context(set);
        self.run_until_idle();
        self.context_outcome(id)
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Move suspended contexts whose wake time has passed back to runnable.
    pub fn wake_ready(&mut self) {
        let now = Instant::now();
        for context in &mut self.contexts {
            if context.state == ContextState::Suspended
                && context.wake_at.is_some_and(|wake| wake <= now)
            {
                context.wake_at = None;
                context.state = ContextState::Runnable;
            }
        }
    }

    /// Execute one step of the next runnable context, round-robin.
    ///
    /// Returns false when nothing is runnable (all contexts done, failed,
    /// or still sleeping).
    pub fn step(&mut self) -> bool {
        self.wake_ready();
        let count = self.contexts.len();
        for probe in 0..count {
            let index = (self.schedule_cursor + probe) % count;
            if self.contexts[index].state == ContextState::Runnable {
                self.schedule_cursor = (index + 1) % count;
                self.step_context_at(index);
                return true;
            }
        }
        false
    }

    /// Step until no context is runnable. Sleeping contexts whose wake time
    /// has not arrived are left suspended; call again later to resume them.
    pub fn run_until_idle(&mut self) {
        while self.step() {}
    }

    fn step_context_at(&mut self, index: usize) {
        // The context is moved out for the duration of the step so that
        // operator handlers can borrow the VM and the context independently.
        let mut context = std::mem::replace(&mut self.contexts[index], Context::placeholder());
        self.step_context(&mut context);
        self.contexts[index] = context;
    }

    fn step_context(&mut self, context: &mut Context) {
        if context.cancelled {
            self.report(
                msg::CANCELLED,
                Severity::Info,
                format!("context {} cancelled", context.id()),
            );
            context.fail(FailureReason::Cancelled);
            return;
        }

        context.steps += 1;
        if let Some(limit) = context.max_steps
            && context.steps > limit
        {
            self.report(
                msg::MAX_INSTRUCTIONS,
                Severity::Error,
                format!("context {} exceeded its budget of {} steps", context.id(), limit),
            );
            context.fail(FailureReason::MaxInstructions(limit));
            return;
        }
        if let Some(deadline) = context.deadline
            && Instant::now() > deadline
        {
            self.report(
                msg::SCRIPT_TIMED_OUT,
                Severity::Error,
                format!("context {} exceeded its wall-clock budget", context.id()),
            );
            context.fail(FailureReason::TimedOut);
            return;
        }

        let instruction = match context.top_frame_mut() {
            None => {
                context.state = ContextState::Done;
                return;
            }
            Some(frame) if frame.is_exhausted() => {
                // Frame transitions count as a step so that loops with
                // trivial bodies still consume budget.
                context.finish_top_frame();
                return;
            }
            Some(frame) => {
                let instruction = frame.instructions.get(frame.ip).cloned();
                frame.ip += 1;
                instruction
            }
        };

        let Some(instruction) = instruction else {
            return;
        };
        self.current_diag = Some(instruction.diag.clone());
        self.execute_op(context, instruction.op);
        self.current_diag = None;
    }

    // -----------------------------------------------------------------------
    // Opcode execution
    // -----------------------------------------------------------------------

    fn execute_op(&mut self, context: &mut Context, op: OpCode) {
        match op {
            OpCode::Push(value) => context.push_value(value),

            OpCode::MakeArray(count) => {
                if let Some(frame) = context.top_frame_mut() {
                    let at = frame.values.len().saturating_sub(count);
                    let items = frame.values.split_off(at);
                    frame.values.push(Value::array(items));
                }
            }

            OpCode::GetVariable(name) => {
                let value = self.lookup_variable(context, &name);
                context.push_value(value);
            }

            OpCode::AssignTo(name) => {
                let value = context.pop_value();
                if is_local_name(&name) {
                    if !context.assign_existing(&name, value) {
                        self.report(
                            msg::UNDECLARED_LOCAL,
                            Severity::Error,
                            format!("assignment to undeclared local `{}`", name),
                        );
                    }
                } else {
                    let namespace = context.namespace();
                    self.namespace_mut(namespace).set(&name, value);
                }
            }

            OpCode::AssignToLocal(name) => {
                let value = context.pop_value();
                context.set_local(&name, value);
            }

            OpCode::CallNular(name) => {
                let Some(op) = self.registry.nular(&name) else {
                    self.dispatch_miss(&name, 0, None, None);
                    context.push_value(Value::Nothing);
                    return;
                };
                let handler = op.handler.clone();
                match handler(self, context) {
                    Ok(Some(value)) => context.push_value(value),
                    Ok(None) => {}
                    Err(error) => self.handler_failed(context, error),
                }
            }

            OpCode::CallUnary(name) => {
                let right = context.pop_value();
                let Some(op) = self.registry.resolve_unary(&name, right.data_type()) else {
                    self.dispatch_miss(&name, 1, None, Some(right.data_type()));
                    context.push_value(Value::Nothing);
                    return;
                };
                let handler = op.handler.clone();
                match handler(self, context, right) {
                    Ok(Some(value)) => context.push_value(value),
                    Ok(None) => {}
                    Err(error) => self.handler_failed(context, error),
                }
            }

            OpCode::CallBinary(name, _prec) => {
                let right = context.pop_value();
                let left = context.pop_value();
                let Some(op) =
                    self.registry
                        .resolve_binary(&name, left.data_type(), right.data_type())
                else {
                    self.dispatch_miss(
                        &name,
                        2,
                        Some(left.data_type()),
                        Some(right.data_type()),
                    );
                    context.push_value(Value::Nothing);
                    return;
                };
                let handler = op.handler.clone();
                match handler(self, context, left, right) {
                    Ok(Some(value)) => context.push_value(value),
                    Ok(None) => {}
                    Err(error) => self.handler_failed(context, error),
                }
            }

            OpCode::EndStatement => {
                if let Some(frame) = context.top_frame_mut() {
                    frame.values.clear();
                }
            }
        }
    }

    fn handler_failed(&mut self, context: &mut Context, error: Error) {
        let text = error.to_string();
        self.report(msg::INTERNAL, Severity::Error, text.clone());
        context.fail(FailureReason::Internal(text));
    }

    fn dispatch_miss(
        &mut self,
        name: &str,
        arity: u8,
        left: Option<DataType>,
        right: Option<DataType>,
    ) {
        let text = match (arity, left, right) {
            (0, _, _) => format!("no nular operator `{}`", name),
            (1, _, Some(right)) => format!("no overload of `{}` accepts {}", name, right),
            (_, Some(left), Some(right)) => {
                format!("no overload of `{}` accepts {} and {}", name, left, right)
            }
            _ => format!("no overload of `{}` matches", name),
        };
        self.report(msg::UNKNOWN_INPUT_TYPE_COMBINATION, Severity::Warning, text);
    }

    /// Resolve a variable for `GET_VARIABLE`: the frame scope chain for
    /// locals, the current namespace with a mission fallback otherwise;
    /// unset names warn and produce nil.
    fn lookup_variable(&mut self, context: &Context, name: &str) -> Value {
        if is_local_name(name) {
            match context.get_local(name) {
                Some(value) => value.clone(),
                None => {
                    self.report(
                        msg::UNDEFINED_VARIABLE,
                        Severity::Warning,
                        format!("local variable `{}` is not defined", name),
                    );
                    Value::Nothing
                }
            }
        } else {
            let found = self
                .namespace(context.namespace())
                .get(name)
                .or_else(|| self.namespace(NamespaceKind::Mission).get(name))
                .cloned();
            match found {
                Some(value) => value,
                None => {
                    self.report(
                        msg::UNDEFINED_VARIABLE,
                        Severity::Warning,
                        format!("variable `{}` is not defined", name),
                    );
                    Value::Nothing
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
