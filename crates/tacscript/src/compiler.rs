//! AST → instruction lowering.
//!
//! Walks the parsed tree once, appending opcodes to a flat instruction
//! sink. Control flow lowers onto the operator pipeline of the runtime
//! (`if`/`then`/`else`, `while`/`do`, `for`/`from`/`to`/`step`/`do`,
//! `switch`/`case`/`:`/`default`, `try`/`catch`, `forEach`) rather than to
//! jumps, so the VM's frame protocol stays in charge of control flow.
//!
//! The pass threads a lexical list of in-scope local names through the
//! recursion, cloned at block boundaries: it decides whether a bare
//! identifier means "local" (and gets the `_` prefix at emit time) or
//! "non-local". Operator names are resolved against the registry while
//! emitting; unknown unary callees fall back to a late-bound `call` so user
//! functions keep working with call syntax.

use std::rc::Rc;

use crate::ast::{Block, Expr, Script, SrcPos, Stmt, UnaryOpKind};
use crate::builtins::FUNCTION_SCOPE;
use crate::diagnostic::{DiagInfo, RuntimeMessage, Severity, msg};
use crate::instruction::{Instruction, InstructionSet, OpCode};
use crate::registry::OperatorRegistry;
use crate::value::{DataType, Value};

pub struct Compiler<'a> {
    registry: &'a OperatorRegistry,
    messages: &'a mut Vec<RuntimeMessage>,
    source: Rc<str>,
    path: Rc<str>,
    /// One snippet per source line, shared into diagnostic records.
    lines: Vec<Rc<str>>,
}

impl<'a> Compiler<'a> {
    /// Lower a parsed script into an instruction set.
    ///
    /// Assembly-level oddities (out-of-range numbers, unknown operator
    /// names) are appended to `messages`; they do not abort lowering.
    pub fn lower(
        registry: &'a OperatorRegistry,
        messages: &'a mut Vec<RuntimeMessage>,
        script: &Script,
        source: &str,
        path: &str,
    ) -> InstructionSet {
        let mut compiler = Compiler {
            registry,
            messages,
            source: Rc::from(source),
            path: Rc::from(path),
            lines: source.lines().map(Rc::from).collect(),
        };
        let mut out = Vec::new();
        let mut locals = Vec::new();
        compiler.lower_statements(&mut out, &mut locals, &script.body);
        InstructionSet::new(out, compiler.source.clone(), compiler.path.clone())
    }

    // -----------------------------------------------------------------------
    // Emission plumbing
    // -----------------------------------------------------------------------

    fn diag(&self, pos: SrcPos) -> DiagInfo {
        let snippet = self
            .lines
            .get(pos.line.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_else(|| Rc::from(""));
        DiagInfo::new(self.path.clone(), pos.line, pos.column, pos.offset, snippet)
    }

    fn emit(&self, out: &mut Vec<Instruction>, op: OpCode, pos: SrcPos) {
        out.push(Instruction::new(op, self.diag(pos)));
    }

    fn message(&mut self, key: &'static str, severity: Severity, text: String, pos: SrcPos) {
        let message = RuntimeMessage::new(key, severity, text).with_diag(self.diag(pos));
        self.messages.push(message);
    }

    /// Lower a statement list, separating statements with `END_STATEMENT`
    /// so each is stack-neutral; the last one keeps its value as the
    /// enclosing frame's result.
    fn lower_statements(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut Vec<String>,
        statements: &[Stmt],
    ) {
        let count = statements.len();
        for (index, stmt) in statements.iter().enumerate() {
            self.lower_stmt(out, locals, stmt);
            if index + 1 < count {
                self.emit(out, OpCode::EndStatement, stmt_pos(stmt));
            }
        }
    }

    /// Lower a block into its own instruction set, with the locals list
    /// cloned so declarations inside stay lexically contained.
    fn block_to_set(&mut self, block: &Block, locals: &[String]) -> Rc<InstructionSet> {
        let mut inner_locals = locals.to_vec();
        let mut out = Vec::new();
        self.lower_statements(&mut out, &mut inner_locals, &block.statements);
        Rc::new(InstructionSet::new(
            out,
            self.source.clone(),
            self.path.clone(),
        ))
    }

    fn expr_to_set(&mut self, expr: &Expr, locals: &[String]) -> Rc<InstructionSet> {
        let mut inner_locals = locals.to_vec();
        let mut out = Vec::new();
        self.lower_expr(&mut out, &mut inner_locals, expr);
        Rc::new(InstructionSet::new(
            out,
            self.source.clone(),
            self.path.clone(),
        ))
    }

    fn is_local(locals: &[String], name: &str) -> bool {
        locals.iter().any(|local| local == name)
    }

    /// The runtime name of an identifier: locals get the `_` prefix here,
    /// at emit time; everything else passes through (including names the
    /// script already spelled with an underscore, like `_this`).
    fn runtime_name(locals: &[String], name: &str) -> Rc<str> {
        if Self::is_local(locals, name) {
            Rc::from(format!("_{}", name).as_str())
        } else {
            Rc::from(name)
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn lower_stmt(&mut self, out: &mut Vec<Instruction>, locals: &mut Vec<String>, stmt: &Stmt) {
        match stmt {
            Stmt::Declaration { name, value, pos } => {
                self.lower_expr(out, locals, value);
                locals.push(name.clone());
                self.emit(
                    out,
                    OpCode::AssignToLocal(Rc::from(format!("_{}", name).as_str())),
                    *pos,
                );
            }

            Stmt::Assignment { name, value, pos } => {
                self.lower_expr(out, locals, value);
                self.emit(out, OpCode::AssignTo(Self::runtime_name(locals, name)), *pos);
            }

            Stmt::IndexAssignment {
                array,
                index,
                value,
                pos,
            } => {
                self.lower_expr(out, locals, array);
                self.lower_expr(out, locals, index);
                self.lower_expr(out, locals, value);
                self.emit(out, OpCode::MakeArray(2), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("set"), 4), *pos);
            }

            Stmt::Expr(expr) => self.lower_expr(out, locals, expr),

            Stmt::Block(block, pos) => {
                // Bare blocks run as a child frame so their locals vanish
                // when the block ends.
                let set = self.block_to_set(block, locals);
                self.emit(out, OpCode::Push(Value::Code(set)), *pos);
                self.emit(out, OpCode::CallUnary(Rc::from("call")), *pos);
            }

            Stmt::If {
                cond,
                then_block,
                else_block,
                pos,
            } => {
                self.lower_expr(out, locals, cond);
                self.emit(out, OpCode::CallUnary(Rc::from("if")), cond.pos());
                let then_set = self.block_to_set(then_block, locals);
                self.emit(out, OpCode::Push(Value::Code(then_set)), *pos);
                if let Some(else_block) = else_block {
                    let else_set = self.block_to_set(else_block, locals);
                    self.emit(out, OpCode::Push(Value::Code(else_set)), *pos);
                    self.emit(out, OpCode::CallBinary(Rc::from("else"), 5), *pos);
                }
                self.emit(out, OpCode::CallBinary(Rc::from("then"), 4), *pos);
            }

            Stmt::While { cond, body, pos } => {
                let cond_set = self.expr_to_set(cond, locals);
                self.emit(out, OpCode::Push(Value::Code(cond_set)), cond.pos());
                self.emit(out, OpCode::CallUnary(Rc::from("while")), *pos);
                let body_set = self.block_to_set(body, locals);
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("do"), 4), *pos);
            }

            Stmt::DoWhile { body, cond, pos } => {
                // Run the body once up front, then enter the regular loop.
                let once = self.block_to_set(body, locals);
                self.emit(out, OpCode::Push(Value::Code(once)), *pos);
                self.emit(out, OpCode::CallUnary(Rc::from("call")), *pos);
                let cond_set = self.expr_to_set(cond, locals);
                self.emit(out, OpCode::Push(Value::Code(cond_set)), cond.pos());
                self.emit(out, OpCode::CallUnary(Rc::from("while")), *pos);
                let body_set = self.block_to_set(body, locals);
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("do"), 4), *pos);
            }

            Stmt::For {
                var,
                from,
                to,
                step,
                body,
                pos,
            } => {
                self.emit(
                    out,
                    OpCode::Push(Value::string(format!("_{}", var))),
                    *pos,
                );
                self.emit(out, OpCode::CallUnary(Rc::from("for")), *pos);
                self.lower_expr(out, locals, from);
                self.emit(out, OpCode::CallBinary(Rc::from("from"), 4), from.pos());
                self.lower_expr(out, locals, to);
                self.emit(out, OpCode::CallBinary(Rc::from("to"), 4), to.pos());
                if let Some(step) = step {
                    self.lower_expr(out, locals, step);
                    self.emit(out, OpCode::CallBinary(Rc::from("step"), 4), step.pos());
                }
                let mut body_locals = locals.clone();
                body_locals.push(var.clone());
                let body_set = self.block_to_set(body, &body_locals);
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("do"), 4), *pos);
            }

            Stmt::ForEach {
                var,
                iterable,
                body,
                pos,
            } => {
                // The body set starts by renaming the implicit `_x` to the
                // script's element variable.
                let mut body_locals = locals.clone();
                body_locals.push(var.clone());
                let mut inner = Vec::new();
                self.emit(&mut inner, OpCode::GetVariable(Rc::from("_x")), *pos);
                self.emit(
                    &mut inner,
                    OpCode::AssignToLocal(Rc::from(format!("_{}", var).as_str())),
                    *pos,
                );
                self.emit(&mut inner, OpCode::EndStatement, *pos);
                self.lower_statements(&mut inner, &mut body_locals, &body.statements);
                let body_set = Rc::new(InstructionSet::new(
                    inner,
                    self.source.clone(),
                    self.path.clone(),
                ));
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.lower_expr(out, locals, iterable);
                self.emit(out, OpCode::CallBinary(Rc::from("foreach"), 4), *pos);
            }

            Stmt::Switch {
                subject,
                cases,
                default,
                pos,
            } => {
                self.lower_expr(out, locals, subject);
                self.emit(out, OpCode::CallUnary(Rc::from("switch")), subject.pos());
                let mut inner = Vec::new();
                let mut inner_locals = locals.clone();
                for case in cases {
                    self.lower_expr(&mut inner, &mut inner_locals, &case.value);
                    self.emit(&mut inner, OpCode::CallUnary(Rc::from("case")), case.pos);
                    if let Some(body) = &case.body {
                        let body_set = self.block_to_set(body, &inner_locals);
                        self.emit(&mut inner, OpCode::Push(Value::Code(body_set)), case.pos);
                        self.emit(&mut inner, OpCode::CallBinary(Rc::from(":"), 4), case.pos);
                    }
                    self.emit(&mut inner, OpCode::EndStatement, case.pos);
                }
                if let Some(default) = default {
                    let default_set = self.block_to_set(default, &inner_locals);
                    self.emit(&mut inner, OpCode::Push(Value::Code(default_set)), *pos);
                    self.emit(&mut inner, OpCode::CallUnary(Rc::from("default")), *pos);
                    self.emit(&mut inner, OpCode::EndStatement, *pos);
                }
                let body_set = Rc::new(InstructionSet::new(
                    inner,
                    self.source.clone(),
                    self.path.clone(),
                ));
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("do"), 4), *pos);
            }

            Stmt::TryCatch {
                body,
                exception,
                handler,
                pos,
            } => {
                let body_set = self.block_to_set(body, locals);
                self.emit(out, OpCode::Push(Value::Code(body_set)), *pos);
                self.emit(out, OpCode::CallUnary(Rc::from("try")), *pos);
                // The handler set starts by renaming `_exception` to the
                // script's chosen variable.
                let mut handler_locals = locals.clone();
                handler_locals.push(exception.clone());
                let mut inner = Vec::new();
                self.emit(&mut inner, OpCode::GetVariable(Rc::from("_exception")), *pos);
                self.emit(
                    &mut inner,
                    OpCode::AssignToLocal(Rc::from(format!("_{}", exception).as_str())),
                    *pos,
                );
                self.emit(&mut inner, OpCode::EndStatement, *pos);
                self.lower_statements(&mut inner, &mut handler_locals, &handler.statements);
                let handler_set = Rc::new(InstructionSet::new(
                    inner,
                    self.source.clone(),
                    self.path.clone(),
                ));
                self.emit(out, OpCode::Push(Value::Code(handler_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("catch"), 4), *pos);
            }

            Stmt::Throw { value, pos } => {
                self.lower_expr(out, locals, value);
                self.emit(out, OpCode::CallUnary(Rc::from("throw")), *pos);
            }

            Stmt::Return { value, pos } => match value {
                Some(value) => {
                    self.lower_expr(out, locals, value);
                    self.emit(out, OpCode::Push(Value::string(FUNCTION_SCOPE)), *pos);
                    self.emit(out, OpCode::CallBinary(Rc::from("breakout"), 4), *pos);
                }
                None => {
                    self.emit(out, OpCode::Push(Value::string(FUNCTION_SCOPE)), *pos);
                    self.emit(out, OpCode::CallUnary(Rc::from("breakout")), *pos);
                }
            },

            Stmt::FunctionDecl {
                name, params, body, ..
            } => {
                let set = self.lower_function(params, body, stmt_pos(stmt));
                self.emit(out, OpCode::Push(Value::Code(set)), stmt_pos(stmt));
                self.emit(
                    out,
                    OpCode::AssignTo(Self::runtime_name(locals, name)),
                    stmt_pos(stmt),
                );
            }
        }
    }

    /// A function body: autoscope prologue, parameter binding, then the
    /// statements with a fresh locals list (functions do not close over
    /// lexical locals; outer names resolve through the namespace).
    fn lower_function(
        &mut self,
        params: &[(String, SrcPos)],
        body: &Block,
        pos: SrcPos,
    ) -> Rc<InstructionSet> {
        let mut inner = Vec::new();
        let mut inner_locals: Vec<String> = Vec::new();
        self.emit(&mut inner, OpCode::Push(Value::string(FUNCTION_SCOPE)), pos);
        self.emit(&mut inner, OpCode::CallUnary(Rc::from("scopename")), pos);
        self.emit(&mut inner, OpCode::EndStatement, pos);
        if !params.is_empty() {
            for (param, param_pos) in params {
                inner_locals.push(param.clone());
                self.emit(
                    &mut inner,
                    OpCode::Push(Value::string(format!("_{}", param))),
                    *param_pos,
                );
            }
            self.emit(&mut inner, OpCode::MakeArray(params.len()), pos);
            self.emit(&mut inner, OpCode::CallUnary(Rc::from("params")), pos);
            self.emit(&mut inner, OpCode::EndStatement, pos);
        }
        self.lower_statements(&mut inner, &mut inner_locals, &body.statements);
        Rc::new(InstructionSet::new(
            inner,
            self.source.clone(),
            self.path.clone(),
        ))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn lower_expr(&mut self, out: &mut Vec<Instruction>, locals: &mut Vec<String>, expr: &Expr) {
        match expr {
            Expr::Number(value, pos) => {
                if value.is_finite() {
                    self.emit(out, OpCode::Push(Value::Scalar(*value)), *pos);
                } else {
                    self.message(
                        msg::NUMBER_OUT_OF_RANGE,
                        Severity::Warning,
                        "number literal out of range".to_string(),
                        *pos,
                    );
                    self.emit(out, OpCode::Push(Value::Scalar(f64::NAN)), *pos);
                }
            }

            Expr::Str(text, pos) => {
                self.emit(out, OpCode::Push(Value::string(text)), *pos);
            }

            Expr::Bool(value, pos) => {
                self.emit(out, OpCode::Push(Value::Boolean(*value)), *pos);
            }

            Expr::Nil(pos) => self.emit(out, OpCode::Push(Value::Nothing), *pos),

            Expr::Array(items, pos) => {
                for item in items {
                    self.lower_expr(out, locals, item);
                }
                self.emit(out, OpCode::MakeArray(items.len()), *pos);
            }

            Expr::Ident(name, pos) => {
                if Self::is_local(locals, name) {
                    self.emit(
                        out,
                        OpCode::GetVariable(Rc::from(format!("_{}", name).as_str())),
                        *pos,
                    );
                } else if self.registry.nular(name).is_some() {
                    self.emit(out, OpCode::CallNular(Rc::from(name.to_lowercase())), *pos);
                } else {
                    self.emit(out, OpCode::GetVariable(Rc::from(name.as_str())), *pos);
                }
            }

            Expr::Function { params, body, pos } => {
                let set = self.lower_function(params, body, *pos);
                self.emit(out, OpCode::Push(Value::Code(set)), *pos);
            }

            Expr::Unary { op, expr, pos } => {
                self.lower_expr(out, locals, expr);
                let name = match op {
                    UnaryOpKind::Not => "!",
                    UnaryOpKind::Neg => "-",
                };
                self.emit(out, OpCode::CallUnary(Rc::from(name)), *pos);
            }

            Expr::Binary { op, lhs, rhs, pos } => {
                let name = op.operator_name();
                if !self.registry.has_binary(name) {
                    self.message(
                        msg::UNKNOWN_OPERATOR,
                        Severity::Error,
                        format!("unknown operator `{}`", name),
                        *pos,
                    );
                    self.emit(out, OpCode::CallNular(Rc::from("nil")), *pos);
                    return;
                }
                self.lower_expr(out, locals, lhs);
                self.lower_expr(out, locals, rhs);
                let precedence = self.registry.binary_precedence(name).unwrap_or(4);
                self.emit(out, OpCode::CallBinary(Rc::from(name), precedence), *pos);
            }

            Expr::Call { callee, args, pos } => self.lower_call(out, locals, callee, args, *pos),

            Expr::Index { array, index, pos } => {
                self.lower_expr(out, locals, array);
                self.lower_expr(out, locals, index);
                self.emit(out, OpCode::CallBinary(Rc::from("select"), 4), *pos);
            }

            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                pos,
            } => {
                self.lower_expr(out, locals, cond);
                self.emit(out, OpCode::CallUnary(Rc::from("if")), cond.pos());
                let then_set = self.expr_to_set(then_expr, locals);
                self.emit(out, OpCode::Push(Value::Code(then_set)), *pos);
                let else_set = self.expr_to_set(else_expr, locals);
                self.emit(out, OpCode::Push(Value::Code(else_set)), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("else"), 5), *pos);
                self.emit(out, OpCode::CallBinary(Rc::from("then"), 4), *pos);
            }
        }
    }

    /// Call syntax: a registered nular (zero args) or unary operator wins;
    /// anything else is rewritten to `args call callee`, which keeps user
    /// functions late-bound.
    fn lower_call(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut Vec<String>,
        callee: &str,
        args: &[Expr],
        pos: SrcPos,
    ) {
        let key = callee.to_lowercase();

        if args.is_empty() && self.registry.nular(&key).is_some() {
            self.emit(out, OpCode::CallNular(Rc::from(key.as_str())), pos);
            return;
        }

        if self.registry.has_unary(&key) {
            // Operators whose declared right side is an array receive the
            // whole argument list as one array, as do multi-argument calls.
            let wants_array = self
                .registry
                .unary_overloads(&key)
                .and_then(|overloads| overloads.first())
                .is_some_and(|op| op.right == DataType::Array);
            for arg in args {
                self.lower_expr(out, locals, arg);
            }
            if args.len() != 1 || wants_array {
                self.emit(out, OpCode::MakeArray(args.len()), pos);
            }
            self.emit(out, OpCode::CallUnary(Rc::from(key.as_str())), pos);
            return;
        }

        for arg in args {
            self.lower_expr(out, locals, arg);
        }
        self.emit(out, OpCode::MakeArray(args.len()), pos);
        self.emit(
            out,
            OpCode::GetVariable(Self::runtime_name(locals, callee)),
            pos,
        );
        self.emit(out, OpCode::CallBinary(Rc::from("call"), 4), pos);
    }
}

fn stmt_pos(stmt: &Stmt) -> SrcPos {
    match stmt {
        Stmt::Declaration { pos, .. }
        | Stmt::Assignment { pos, .. }
        | Stmt::IndexAssignment { pos, .. }
        | Stmt::Block(_, pos)
        | Stmt::If { pos, .. }
        | Stmt::While { pos, .. }
        | Stmt::DoWhile { pos, .. }
        | Stmt::For { pos, .. }
        | Stmt::ForEach { pos, .. }
        | Stmt::Switch { pos, .. }
        | Stmt::TryCatch { pos, .. }
        | Stmt::Throw { pos, .. }
        | Stmt::Return { pos, .. }
        | Stmt::FunctionDecl { pos, .. } => *pos,
        Stmt::Expr(expr) => expr.pos(),
    }
}
