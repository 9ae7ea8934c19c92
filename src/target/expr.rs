//! A small C expression evaluator: enough to name a vector or a node in the
//! target (`*(SVector *)0x55d0c0a0`, `root->children`, `&nodes[3]`).

use super::types::{Scalar, Type, parse_integer};
use super::{Target, Value};
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Integer(u64),
    Ident(String),
    Star,
    Amp,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Arrow,
}

fn tokenize(expression: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '*' => Token::Star,
            '&' => Token::Amp,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '.' => Token::Dot,
            '-' if chars.peek().map(|(_, c)| *c) == Some('>') => {
                chars.next();
                Token::Arrow
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) = chars.peek().copied() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let word = &expression[start..end];
                if c.is_ascii_digit() {
                    Token::Integer(parse_integer(word).ok_or(format!("invalid number {word}"))?)
                } else {
                    Token::Ident(word.to_string())
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Evaluator<'a> {
    target: &'a Target,
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

pub(super) fn evaluate(target: &Target, expression: &str) -> InspectResult<Value> {
    let tokens =
        tokenize(expression).map_err(|reason| InspectError::evaluation(expression, reason))?;
    let mut evaluator = Evaluator {
        target,
        expression,
        tokens,
        pos: 0,
    };

    let value = evaluator.unary()?;
    if evaluator.pos != evaluator.tokens.len() {
        return Err(evaluator.error("unexpected trailing input"));
    }
    Ok(value)
}

impl Evaluator<'_> {
    fn error(&self, reason: impl Into<String>) -> InspectError {
        InspectError::evaluation(self.expression, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> InspectResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(self.error(format!("expected {expected:?}"))),
        }
    }

    fn unary(&mut self) -> InspectResult<Value> {
        match self.peek() {
            Some(Token::Star) => {
                self.pos += 1;
                let value = self.unary()?;
                self.contents_of(value)
            }
            Some(Token::Amp) => {
                self.pos += 1;
                let value = self.unary()?;
                match value.address() {
                    Some(address) => Ok(Value::immediate(address, value.ty.pointer_to())),
                    None => Err(self.error("attempt to take address of value not located in memory")),
                }
            }
            Some(Token::LParen) => match self.cast_type()? {
                Some(ty) => {
                    let value = self.unary()?;
                    self.cast(value, ty)
                }
                None => self.postfix(),
            },
            _ => self.postfix(),
        }
    }

    /// If the parenthesised tokens at the cursor spell a type, consume them
    /// and return it.
    fn cast_type(&mut self) -> InspectResult<Option<Type>> {
        let mut words = Vec::new();
        let mut end = self.pos + 1;
        loop {
            match self.tokens.get(end) {
                // Type names never continue after their first '*'
                Some(Token::Ident(word)) if !words.contains(&"*") => words.push(word.as_str()),
                Some(Token::Star) if !words.is_empty() => words.push("*"),
                Some(Token::RParen) if !words.is_empty() => break,
                _ => return Ok(None),
            }
            end += 1;
        }

        let name = words.join(" ");
        match self.target.resolve_type(&name) {
            Ok(ty) => {
                self.pos = end + 1;
                Ok(Some(ty))
            }
            // A lone identifier may still be a parenthesised symbol
            Err(_) if words.len() == 1 => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn postfix(&mut self) -> InspectResult<Value> {
        let mut value = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.member_name()?;
                    value = self.member(&value, &name)?;
                }
                Some(Token::Arrow) => {
                    self.pos += 1;
                    let name = self.member_name()?;
                    if !value.ty.is_pointer() {
                        return Err(self.error(format!("'->' applied to non-pointer {}", value.ty)));
                    }
                    let record = self.target.dereference(&value)?;
                    value = self.member(&record, &name)?;
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.next() {
                        Some(Token::Integer(index)) => index,
                        _ => return Err(self.error("expected an integer index")),
                    };
                    self.expect(Token::RBracket)?;
                    value = self.index(value, index)?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn primary(&mut self) -> InspectResult<Value> {
        match self.next() {
            Some(Token::Integer(raw)) => Ok(Value::immediate(raw, Type::Scalar(Scalar::U64))),
            Some(Token::Ident(name)) => self
                .target
                .symbol(&name)
                .ok_or_else(|| self.error(format!("no symbol \"{name}\" in current context"))),
            Some(Token::LParen) => {
                let value = self.unary()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(token) => Err(self.error(format!("unexpected {token:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn member_name(&mut self) -> InspectResult<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(self.error("expected a member name")),
        }
    }

    fn member(&self, value: &Value, name: &str) -> InspectResult<Value> {
        let Type::Record(record) = &value.ty else {
            return Err(self.error(format!("{} is not a structure", value.ty)));
        };
        let layout = self.target.types().record(record)?;
        if layout.field(name).is_none() {
            return Err(self.error(format!("there is no member named {name}")));
        }
        self.target.field(value, name)
    }

    fn contents_of(&self, value: Value) -> InspectResult<Value> {
        match &value.ty {
            Type::Pointer(_) => self.target.dereference(&value),
            Type::Array(_, _) => self.index(value, 0),
            _ => Err(self.error("attempt to take contents of a non-pointer value")),
        }
    }

    fn index(&self, value: Value, index: u64) -> InspectResult<Value> {
        let (base, element) = match &value.ty {
            Type::Pointer(element) => (self.target.read_raw(&value)?, element.as_ref().clone()),
            Type::Array(element, _) => match value.address() {
                Some(address) => (address, element.as_ref().clone()),
                None => return Err(self.error("cannot index an array not located in memory")),
            },
            _ => return Err(self.error("cannot subscript something that is not an array or a pointer")),
        };
        let size = self.target.types().size_of(&element)?;
        Ok(Value::at(base.wrapping_add(index.wrapping_mul(size)), element))
    }

    fn cast(&self, value: Value, ty: Type) -> InspectResult<Value> {
        if !matches!(ty, Type::Pointer(_) | Type::Scalar(_)) {
            return Err(self.error(format!("invalid cast to {ty}")));
        }
        let raw = match (&value.ty, value.address()) {
            (Type::Pointer(_) | Type::Scalar(_), _) => self.target.read_raw(&value)?,
            // Arrays decay to a pointer to their first element
            (Type::Array(_, _), Some(address)) => address,
            _ => return Err(self.error(format!("invalid cast from {}", value.ty))),
        };
        let raw = match &ty {
            Type::Scalar(scalar) if scalar.size() < 8 => raw & ((1u64 << (scalar.size() * 8)) - 1),
            _ => raw,
        };
        Ok(Value::immediate(raw, ty))
    }
}
