//! Recursive-descent parser for the surface dialect.
//!
//! Produces the [`crate::ast`] tree the compiler lowers. Grammar shape is
//! C-like: statements end in semicolons (optional before a closing brace),
//! blocks group with braces, expressions use conventional precedence with
//! `^` binding tightest and `||` loosest.

use crate::ast::{Block, Expr, Script, SrcPos, Stmt, SwitchCase, UnaryOpKind};
use crate::ast::BinaryOpKind as Bin;
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind, tokenize};

/// Parse source text into a script AST.
pub fn parse(source: &str, path: &str) -> Result<Script> {
    let tokens = tokenize(source, path)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        path,
    };
    parser.script()
}

struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    path: &'a str,
}

impl Parser<'_> {
    fn script(&mut self) -> Result<Script> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            body.push(self.statement()?);
        }
        Ok(Script { body })
    }

    // -----------------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.index)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(&format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, SrcPos)> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, token.pos))
            }
            _ => Err(self.error_here(&format!("expected {}", what))),
        }
    }

    fn error_here(&self, message: &str) -> Error {
        let pos = self.peek().pos;
        Error::Parse(format!(
            "{}:{}:{}: {}",
            self.path, pos.line, pos.column, message
        ))
    }

    /// Statement terminator: a semicolon, or nothing right before `}`/EOF.
    fn terminator(&mut self) -> Result<()> {
        if self.eat(&TokenKind::Semicolon)
            || self.check(&TokenKind::RBrace)
            || self.check(&TokenKind::Eof)
        {
            Ok(())
        } else {
            Err(self.error_here("expected `;`"))
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt> {
        let pos = self.peek().pos;
        match &self.peek().kind {
            TokenKind::Let => {
                self.advance();
                let (name, _) = self.expect_ident("a variable name after `let`")?;
                self.expect(&TokenKind::Assign, "`=`")?;
                let value = self.expression()?;
                self.terminator()?;
                Ok(Stmt::Declaration { name, value, pos })
            }
            TokenKind::Function => {
                self.advance();
                let (name, _) = self.expect_ident("a function name")?;
                let params = self.parameter_list()?;
                let body = self.block()?;
                Ok(Stmt::FunctionDecl {
                    name,
                    params,
                    body,
                    pos,
                })
            }
            TokenKind::If => self.if_statement(pos),
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen, "`(`")?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body, pos })
            }
            TokenKind::Do => {
                self.advance();
                let body = self.block()?;
                self.expect(&TokenKind::While, "`while` after `do` body")?;
                self.expect(&TokenKind::LParen, "`(`")?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                self.terminator()?;
                Ok(Stmt::DoWhile { body, cond, pos })
            }
            TokenKind::For => {
                self.advance();
                self.expect(&TokenKind::LParen, "`(`")?;
                let (var, _) = self.expect_ident("a loop variable")?;
                self.expect(&TokenKind::From, "`from`")?;
                let from = self.expression()?;
                self.expect(&TokenKind::To, "`to`")?;
                let to = self.expression()?;
                let step = if self.eat(&TokenKind::Step) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(&TokenKind::RParen, "`)`")?;
                let body = self.block()?;
                Ok(Stmt::For {
                    var,
                    from,
                    to,
                    step,
                    body,
                    pos,
                })
            }
            TokenKind::ForEach => {
                self.advance();
                self.expect(&TokenKind::LParen, "`(`")?;
                let (var, _) = self.expect_ident("an element variable")?;
                self.expect(&TokenKind::In, "`in`")?;
                let iterable = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let body = self.block()?;
                Ok(Stmt::ForEach {
                    var,
                    iterable,
                    body,
                    pos,
                })
            }
            TokenKind::Switch => self.switch_statement(pos),
            TokenKind::Try => {
                self.advance();
                let body = self.block()?;
                self.expect(&TokenKind::Catch, "`catch` after `try` body")?;
                self.expect(&TokenKind::LParen, "`(`")?;
                let (exception, _) = self.expect_ident("an exception variable")?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let handler = self.block()?;
                Ok(Stmt::TryCatch {
                    body,
                    exception,
                    handler,
                    pos,
                })
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.expression()?;
                self.terminator()?;
                Ok(Stmt::Throw { value, pos })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RBrace)
                    || self.check(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.terminator()?;
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::LBrace => {
                let block = self.block()?;
                Ok(Stmt::Block(block, pos))
            }
            _ => self.expression_or_assignment(pos),
        }
    }

    /// An expression statement, or an assignment if the parsed expression
    /// turns out to be a valid target followed by `=`.
    fn expression_or_assignment(&mut self, pos: SrcPos) -> Result<Stmt> {
        let expr = self.expression()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.expression()?;
            self.terminator()?;
            return match expr {
                Expr::Ident(name, _) => Ok(Stmt::Assignment { name, value, pos }),
                Expr::Index { array, index, .. } => Ok(Stmt::IndexAssignment {
                    array: *array,
                    index: *index,
                    value,
                    pos,
                }),
                _ => Err(self.error_here("invalid assignment target")),
            };
        }
        self.terminator()?;
        Ok(Stmt::Expr(expr))
    }

    fn if_statement(&mut self, pos: SrcPos) -> Result<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "`)`")?;
        let then_block = self.block()?;
        let else_block = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` chains nest as a single-statement block.
                let nested_pos = self.peek().pos;
                let nested = self.if_statement(nested_pos)?;
                Some(Block {
                    statements: vec![nested],
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            pos,
        })
    }

    fn switch_statement(&mut self, pos: SrcPos) -> Result<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`")?;
        let subject = self.expression()?;
        self.expect(&TokenKind::RParen, "`)`")?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            let case_pos = self.peek().pos;
            match &self.peek().kind {
                TokenKind::Case => {
                    self.advance();
                    let value = self.expression()?;
                    self.expect(&TokenKind::Colon, "`:`")?;
                    let body = if self.check(&TokenKind::LBrace) {
                        Some(self.block()?)
                    } else {
                        None
                    };
                    cases.push(SwitchCase {
                        value,
                        body,
                        pos: case_pos,
                    });
                }
                TokenKind::Default => {
                    self.advance();
                    self.expect(&TokenKind::Colon, "`:`")?;
                    default = Some(self.block()?);
                }
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(Stmt::Switch {
                        subject,
                        cases,
                        default,
                        pos,
                    });
                }
                _ => return Err(self.error_here("expected `case`, `default`, or `}`")),
            }
        }
    }

    fn block(&mut self) -> Result<Block> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error_here("unterminated block, expected `}`"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        Ok(Block { statements })
    }

    fn parameter_list(&mut self) -> Result<Vec<(String, SrcPos)>> {
        self.expect(&TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident("a parameter name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;
        Ok(params)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr> {
        let cond = self.or_expr()?;
        if self.eat(&TokenKind::Question) {
            let pos = cond.pos();
            let then_expr = self.expression()?;
            self.expect(&TokenKind::Colon, "`:` in ternary")?;
            let else_expr = self.expression()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                pos,
            });
        }
        Ok(cond)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.check(&TokenKind::OrOr) {
            let pos = self.advance().pos;
            let rhs = self.and_expr()?;
            lhs = binary(Bin::Or, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.comparison()?;
        while self.check(&TokenKind::AndAnd) {
            let pos = self.advance().pos;
            let rhs = self.comparison()?;
            lhs = binary(Bin::And, lhs, rhs, pos);
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => Bin::Eq,
                TokenKind::NotEq => Bin::NotEq,
                TokenKind::Lt => Bin::Lt,
                TokenKind::LtEq => Bin::LtEq,
                TokenKind::Gt => Bin::Gt,
                TokenKind::GtEq => Bin::GtEq,
                _ => return Ok(lhs),
            };
            let pos = self.advance().pos;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => Bin::Add,
                TokenKind::Minus => Bin::Sub,
                _ => return Ok(lhs),
            };
            let pos = self.advance().pos;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => Bin::Mul,
                TokenKind::Slash => Bin::Div,
                TokenKind::Percent => Bin::Mod,
                _ => return Ok(lhs),
            };
            let pos = self.advance().pos;
            let rhs = self.power()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn power(&mut self) -> Result<Expr> {
        let lhs = self.unary()?;
        if self.check(&TokenKind::Caret) {
            let pos = self.advance().pos;
            // Right-associative.
            let rhs = self.power()?;
            return Ok(binary(Bin::Pow, lhs, rhs, pos));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek().kind {
            TokenKind::Not => {
                let pos = self.advance().pos;
                let expr = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOpKind::Not,
                    expr: Box::new(expr),
                    pos,
                })
            }
            TokenKind::Minus => {
                let pos = self.advance().pos;
                let expr = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOpKind::Neg,
                    expr: Box::new(expr),
                    pos,
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.check(&TokenKind::LBracket) {
            let pos = self.advance().pos;
            let index = self.expression()?;
            self.expect(&TokenKind::RBracket, "`]`")?;
            expr = Expr::Index {
                array: Box::new(expr),
                index: Box::new(index),
                pos,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let pos = token.pos;
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Number(value, pos))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Str(text, pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true, pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false, pos))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil(pos))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "`]`")?;
                Ok(Expr::Array(items, pos))
            }
            TokenKind::Function => {
                self.advance();
                let params = self.parameter_list()?;
                let body = self.block()?;
                Ok(Expr::Function { params, body, pos })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)`")?;
                    Ok(Expr::Call {
                        callee: name,
                        args,
                        pos,
                    })
                } else {
                    Ok(Expr::Ident(name, pos))
                }
            }
            _ => Err(self.error_here("expected an expression")),
        }
    }
}

fn binary(op: Bin, lhs: Expr, rhs: Expr, pos: SrcPos) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_shapes_the_tree() {
        let script = parse("1 + 2 * 3;", "test.tac").unwrap();
        assert_eq!(script.to_source(), "1 + 2 * 3;");
        let script = parse("(1 + 2) * 3;", "test.tac").unwrap();
        assert_eq!(script.to_source(), "(1 + 2) * 3;");
    }

    #[test]
    fn print_parse_print_reaches_a_fixpoint() {
        let sources = [
            "let x = [1, 2, 3]; x[1] = 9; x;",
            "if (x > 0) { \"pos\"; } else { \"neg\"; }",
            "for (i from 0 to 4 step 2) { y = i; }",
            "while (z < 3) { z = z + 1; }",
            "function add(a, b) { return a + b; }",
            "try { throw 1; } catch (e) { x = e; }",
            "switch (n) { case 1: { \"one\" } default: { \"many\" } }",
            "foreach (v in xs) { total = total + v; }",
            "let f = function(n) { return n * 2; };",
            "do { x = x - 1; } while (x > 0);",
        ];
        for source in sources {
            let printed = parse(source, "test.tac").unwrap().to_source();
            let reprinted = parse(&printed, "test.tac").unwrap().to_source();
            assert_eq!(printed, reprinted, "fixpoint failed for `{}`", source);
        }
    }

    #[test]
    fn assignment_targets_are_validated() {
        assert!(parse("x = 1;", "test.tac").is_ok());
        assert!(parse("xs[0] = 1;", "test.tac").is_ok());
        assert!(parse("1 = 2;", "test.tac").is_err());
    }

    #[test]
    fn else_if_chains_nest() {
        let script = parse("if (a) { 1; } else if (b) { 2; } else { 3; }", "t.tac").unwrap();
        let printed = script.to_source();
        assert_eq!(
            printed,
            "if (a) { 1; } else { if (b) { 2; } else { 3; } }"
        );
    }
}
