//! Tokenizer for the surface dialect.
//!
//! UTF-8 input with an optional BOM; columns are counted in code points.
//! Strings escape their own quote by doubling it (`"…""…"`, `'…''…'`).
//! Numbers accept decimals, exponents, and `0x` hex literals.

use crate::ast::SrcPos;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),

    // Keywords
    True,
    False,
    Nil,
    Let,
    If,
    Else,
    While,
    Do,
    For,
    From,
    To,
    Step,
    ForEach,
    In,
    Switch,
    Case,
    Default,
    Try,
    Catch,
    Throw,
    Return,
    Function,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Question,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Not,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SrcPos,
}

struct Lexer<'a> {
    chars: Vec<char>,
    /// Byte offset of each char, parallel to `chars`.
    offsets: Vec<usize>,
    index: usize,
    line: u32,
    column: u32,
    path: &'a str,
}

/// Tokenize a whole source text.
pub fn tokenize(source: &str, path: &str) -> Result<Vec<Token>> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let mut chars = Vec::with_capacity(source.len());
    let mut offsets = Vec::with_capacity(source.len());
    for (offset, ch) in source.char_indices() {
        chars.push(ch);
        offsets.push(offset);
    }
    let mut lexer = Lexer {
        chars,
        offsets,
        index: 0,
        line: 1,
        column: 1,
        path,
    };
    lexer.run()
}

impl Lexer<'_> {
    fn run(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let pos = self.pos();
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                return Ok(tokens);
            };
            let kind = match ch {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ',' => self.single(TokenKind::Comma),
                ';' => self.single(TokenKind::Semicolon),
                ':' => self.single(TokenKind::Colon),
                '?' => self.single(TokenKind::Question),
                '+' => self.single(TokenKind::Plus),
                '-' => self.single(TokenKind::Minus),
                '*' => self.single(TokenKind::Star),
                '/' => self.single(TokenKind::Slash),
                '%' => self.single(TokenKind::Percent),
                '^' => self.single(TokenKind::Caret),
                '=' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::EqEq
                    } else {
                        TokenKind::Assign
                    }
                }
                '!' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::NotEq
                    } else {
                        TokenKind::Not
                    }
                }
                '<' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::LtEq
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::GtEq
                    } else {
                        TokenKind::Gt
                    }
                }
                '&' => {
                    self.advance();
                    if self.peek() == Some('&') {
                        self.advance();
                        TokenKind::AndAnd
                    } else {
                        return Err(self.error(pos, "expected `&&`"));
                    }
                }
                '|' => {
                    self.advance();
                    if self.peek() == Some('|') {
                        self.advance();
                        TokenKind::OrOr
                    } else {
                        return Err(self.error(pos, "expected `||`"));
                    }
                }
                '"' | '\'' => self.string(ch)?,
                c if c.is_ascii_digit() => self.number(pos)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(),
                c => return Err(self.error(pos, &format!("unexpected character `{}`", c))),
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.index + ahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn pos(&self) -> SrcPos {
        SrcPos {
            line: self.line,
            column: self.column,
            offset: self
                .offsets
                .get(self.index)
                .copied()
                .unwrap_or_else(|| self.offsets.last().map_or(0, |last| last + 1)),
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.pos();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => return Err(self.error(start, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<TokenKind> {
        let start = self.pos();
        self.advance();
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.advance();
                    // A doubled quote is an escaped quote, not the end.
                    if self.peek() == Some(quote) {
                        self.advance();
                        text.push(quote);
                    } else {
                        return Ok(TokenKind::Str(text));
                    }
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
                None => return Err(self.error(start, "unterminated string literal")),
            }
        }
    }

    fn number(&mut self, start: SrcPos) -> Result<TokenKind> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(self.error(start, "expected hex digits after `0x`"));
            }
            return match u64::from_str_radix(&digits, 16) {
                Ok(value) => Ok(TokenKind::Number(value as f64)),
                // Too large for u64; signalled to the compiler as non-finite.
                Err(_) => Ok(TokenKind::Number(f64::INFINITY)),
            };
        }

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    text.push(self.advance().unwrap_or('+'));
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        match text.parse::<f64>() {
            Ok(value) => Ok(TokenKind::Number(value)),
            Err(_) => Err(self.error(start, &format!("malformed number `{}`", text))),
        }
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "let" => TokenKind::Let,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "for" => TokenKind::For,
            "from" => TokenKind::From,
            "to" => TokenKind::To,
            "step" => TokenKind::Step,
            "foreach" => TokenKind::ForEach,
            "in" => TokenKind::In,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "throw" => TokenKind::Throw,
            "return" => TokenKind::Return,
            "function" => TokenKind::Function,
            _ => TokenKind::Ident(text),
        }
    }

    fn error(&self, pos: SrcPos, message: &str) -> Error {
        Error::Parse(format!(
            "{}:{}:{}: {}",
            self.path, pos.line, pos.column, message
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test.tac")
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(
            kinds("1 2.5 1.5e-3 0xFF"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(1.5e-3),
                TokenKind::Number(255.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn doubled_quotes_escape() {
        assert_eq!(
            kinds(r#""say ""hi""""#),
            vec![TokenKind::Str("say \"hi\"".to_string()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("'it''s'"),
            vec![TokenKind::Str("it's".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn tolerates_a_byte_order_mark() {
        assert_eq!(
            kinds("\u{feff}let"),
            vec![TokenKind::Let, TokenKind::Eof]
        );
    }

    #[test]
    fn columns_count_code_points() {
        let tokens = tokenize("\"über\" x", "test.tac").unwrap();
        // The identifier starts at column 8: six code points of string
        // literal plus a space.
        assert_eq!(tokens[1].pos.column, 8);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n/* block */ 2"),
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]
        );
    }
}
