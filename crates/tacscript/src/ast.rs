//! Abstract syntax tree of the surface dialect, with source printing.
//!
//! The parser produces this tree; the compiler lowers it onto the operator
//! pipeline. `to_source` renders a tree back into parseable text (used by
//! diagnostics and the pretty-print round-trip tests); printing reaches a
//! fixpoint after one parse, up to whitespace and redundant parentheses.

use std::fmt;

/// Position of a token in the source text (1-based line/column, column in
/// code points, byte offset).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SrcPos {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOpKind {
    /// The operator name the compiler resolves against the registry.
    pub fn operator_name(self) -> &'static str {
        match self {
            BinaryOpKind::Or => "||",
            BinaryOpKind::And => "&&",
            BinaryOpKind::Eq => "==",
            BinaryOpKind::NotEq => "!=",
            BinaryOpKind::Lt => "<",
            BinaryOpKind::LtEq => "<=",
            BinaryOpKind::Gt => ">",
            BinaryOpKind::GtEq => ">=",
            BinaryOpKind::Add => "+",
            BinaryOpKind::Sub => "-",
            BinaryOpKind::Mul => "*",
            BinaryOpKind::Div => "/",
            BinaryOpKind::Mod => "%",
            BinaryOpKind::Pow => "^",
        }
    }

    /// Grammar-level precedence, used only for printing parentheses.
    fn print_precedence(self) -> u8 {
        match self {
            BinaryOpKind::Or => 1,
            BinaryOpKind::And => 2,
            BinaryOpKind::Eq
            | BinaryOpKind::NotEq
            | BinaryOpKind::Lt
            | BinaryOpKind::LtEq
            | BinaryOpKind::Gt
            | BinaryOpKind::GtEq => 3,
            BinaryOpKind::Add | BinaryOpKind::Sub => 6,
            BinaryOpKind::Mul | BinaryOpKind::Div | BinaryOpKind::Mod => 7,
            BinaryOpKind::Pow => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64, SrcPos),
    Str(String, SrcPos),
    Bool(bool, SrcPos),
    Nil(SrcPos),
    Array(Vec<Expr>, SrcPos),
    Ident(String, SrcPos),
    Function {
        params: Vec<(String, SrcPos)>,
        body: Block,
        pos: SrcPos,
    },
    Unary {
        op: UnaryOpKind,
        expr: Box<Expr>,
        pos: SrcPos,
    },
    Binary {
        op: BinaryOpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: SrcPos,
    },
    /// `callee(args…)` — resolved against the unary operator registry at
    /// lowering time, falling back to a late-bound `call`.
    Call {
        callee: String,
        args: Vec<Expr>,
        pos: SrcPos,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
        pos: SrcPos,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        pos: SrcPos,
    },
}

impl Expr {
    pub fn pos(&self) -> SrcPos {
        match self {
            Expr::Number(_, pos)
            | Expr::Str(_, pos)
            | Expr::Bool(_, pos)
            | Expr::Nil(pos)
            | Expr::Array(_, pos)
            | Expr::Ident(_, pos) => *pos,
            Expr::Function { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Ternary { pos, .. } => *pos,
        }
    }

    fn write(&self, out: &mut String, parent_prec: u8) {
        match self {
            Expr::Number(n, _) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    out.push_str(&format!("{}", *n as i64));
                } else {
                    out.push_str(&format!("{}", n));
                }
            }
            Expr::Str(s, _) => {
                out.push('"');
                out.push_str(&s.replace('"', "\"\""));
                out.push('"');
            }
            Expr::Bool(b, _) => out.push_str(if *b { "true" } else { "false" }),
            Expr::Nil(_) => out.push_str("nil"),
            Expr::Array(items, _) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write(out, 0);
                }
                out.push(']');
            }
            Expr::Ident(name, _) => out.push_str(name),
            Expr::Function { params, body, .. } => {
                out.push_str("function(");
                for (i, (param, _)) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(param);
                }
                out.push_str(") ");
                body.write(out);
            }
            Expr::Unary { op, expr, .. } => {
                out.push(match op {
                    UnaryOpKind::Not => '!',
                    UnaryOpKind::Neg => '-',
                });
                expr.write(out, 9);
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let prec = op.print_precedence();
                let needs_parens = prec < parent_prec;
                if needs_parens {
                    out.push('(');
                }
                lhs.write(out, prec);
                out.push(' ');
                out.push_str(op.operator_name());
                out.push(' ');
                rhs.write(out, prec + 1);
                if needs_parens {
                    out.push(')');
                }
            }
            Expr::Call { callee, args, .. } => {
                out.push_str(callee);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write(out, 0);
                }
                out.push(')');
            }
            Expr::Index { array, index, .. } => {
                array.write(out, 9);
                out.push('[');
                index.write(out, 0);
                out.push(']');
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let needs_parens = parent_prec > 0;
                if needs_parens {
                    out.push('(');
                }
                cond.write(out, 1);
                out.push_str(" ? ");
                then_expr.write(out, 1);
                out.push_str(" : ");
                else_expr.write(out, 1);
                if needs_parens {
                    out.push(')');
                }
            }
        }
    }

    pub fn to_source(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, 0);
        out
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: Expr,
    /// A case without a body falls through to the next one.
    pub body: Option<Block>,
    pub pos: SrcPos,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Declaration {
        name: String,
        value: Expr,
        pos: SrcPos,
    },
    Assignment {
        name: String,
        value: Expr,
        pos: SrcPos,
    },
    IndexAssignment {
        array: Expr,
        index: Expr,
        value: Expr,
        pos: SrcPos,
    },
    Expr(Expr),
    Block(Block, SrcPos),
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        pos: SrcPos,
    },
    While {
        cond: Expr,
        body: Block,
        pos: SrcPos,
    },
    DoWhile {
        body: Block,
        cond: Expr,
        pos: SrcPos,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Block,
        pos: SrcPos,
    },
    ForEach {
        var: String,
        iterable: Expr,
        body: Block,
        pos: SrcPos,
    },
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
        pos: SrcPos,
    },
    TryCatch {
        body: Block,
        exception: String,
        handler: Block,
        pos: SrcPos,
    },
    Throw {
        value: Expr,
        pos: SrcPos,
    },
    Return {
        value: Option<Expr>,
        pos: SrcPos,
    },
    FunctionDecl {
        name: String,
        params: Vec<(String, SrcPos)>,
        body: Block,
        pos: SrcPos,
    },
}

impl Stmt {
    fn write(&self, out: &mut String) {
        match self {
            Stmt::Declaration { name, value, .. } => {
                out.push_str("let ");
                out.push_str(name);
                out.push_str(" = ");
                value.write(out, 0);
                out.push(';');
            }
            Stmt::Assignment { name, value, .. } => {
                out.push_str(name);
                out.push_str(" = ");
                value.write(out, 0);
                out.push(';');
            }
            Stmt::IndexAssignment {
                array,
                index,
                value,
                ..
            } => {
                array.write(out, 9);
                out.push('[');
                index.write(out, 0);
                out.push_str("] = ");
                value.write(out, 0);
                out.push(';');
            }
            Stmt::Expr(expr) => {
                expr.write(out, 0);
                out.push(';');
            }
            Stmt::Block(block, _) => block.write(out),
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                out.push_str("if (");
                cond.write(out, 0);
                out.push_str(") ");
                then_block.write(out);
                if let Some(else_block) = else_block {
                    out.push_str(" else ");
                    else_block.write(out);
                }
            }
            Stmt::While { cond, body, .. } => {
                out.push_str("while (");
                cond.write(out, 0);
                out.push_str(") ");
                body.write(out);
            }
            Stmt::DoWhile { body, cond, .. } => {
                out.push_str("do ");
                body.write(out);
                out.push_str(" while (");
                cond.write(out, 0);
                out.push_str(");");
            }
            Stmt::For {
                var,
                from,
                to,
                step,
                body,
                ..
            } => {
                out.push_str("for (");
                out.push_str(var);
                out.push_str(" from ");
                from.write(out, 0);
                out.push_str(" to ");
                to.write(out, 0);
                if let Some(step) = step {
                    out.push_str(" step ");
                    step.write(out, 0);
                }
                out.push_str(") ");
                body.write(out);
            }
            Stmt::ForEach {
                var,
                iterable,
                body,
                ..
            } => {
                out.push_str("foreach (");
                out.push_str(var);
                out.push_str(" in ");
                iterable.write(out, 0);
                out.push_str(") ");
                body.write(out);
            }
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                out.push_str("switch (");
                subject.write(out, 0);
                out.push_str(") { ");
                for case in cases {
                    out.push_str("case ");
                    case.value.write(out, 0);
                    out.push(':');
                    if let Some(body) = &case.body {
                        out.push(' ');
                        body.write(out);
                    }
                    out.push(' ');
                }
                if let Some(default) = default {
                    out.push_str("default: ");
                    default.write(out);
                    out.push(' ');
                }
                out.push('}');
            }
            Stmt::TryCatch {
                body,
                exception,
                handler,
                ..
            } => {
                out.push_str("try ");
                body.write(out);
                out.push_str(" catch (");
                out.push_str(exception);
                out.push_str(") ");
                handler.write(out);
            }
            Stmt::Throw { value, .. } => {
                out.push_str("throw ");
                value.write(out, 0);
                out.push(';');
            }
            Stmt::Return { value, .. } => {
                out.push_str("return");
                if let Some(value) = value {
                    out.push(' ');
                    value.write(out, 0);
                }
                out.push(';');
            }
            Stmt::FunctionDecl {
                name, params, body, ..
            } => {
                out.push_str("function ");
                out.push_str(name);
                out.push('(');
                for (i, (param, _)) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(param);
                }
                out.push_str(") ");
                body.write(out);
            }
        }
    }
}

/// A `{ … }` group of statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

impl Block {
    fn write(&self, out: &mut String) {
        out.push_str("{ ");
        for stmt in &self.statements {
            stmt.write(out);
            out.push(' ');
        }
        out.push('}');
    }
}

/// A whole parsed compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub body: Vec<Stmt>,
}

impl Script {
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for (i, stmt) in self.body.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            stmt.write(&mut out);
        }
        out
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_source())
    }
}
