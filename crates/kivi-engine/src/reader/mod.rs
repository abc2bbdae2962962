//! S-expression reader
//!
//! Tokenizes with logos and builds values directly in the heap. Integers
//! must fit the 62-bit immediate range and symbol names are at most 1024
//! bytes. Partial lists are rooted while nested expressions allocate.

use logos::Logos;

use crate::runtime::errors::RuntimeError;
use crate::runtime::object::set_cdr;
use crate::runtime::roots::push_roots;
use crate::runtime::symbols::MAX_SYMBOL_LEN;
use crate::runtime::value::{Value, INT_MAX, INT_MIN, NIL};
use crate::runtime::Runtime;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r";[^\n]*")]
enum Token {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("'")]
    Quote,

    #[regex(r"-?[0-9]+", priority = 3)]
    Number,

    #[regex(r"[^ \t\r\n()';]+")]
    Symbol,
}

/// Streaming reader over one source string.
pub struct Reader<'src> {
    lexer: logos::Lexer<'src, Token>,
}

impl<'src> Reader<'src> {
    pub fn new(src: &'src str) -> Reader<'src> {
        Reader {
            lexer: Token::lexer(src),
        }
    }

    /// Read the next top-level expression. `None` on end of input, or after
    /// a malformed expression (the error lands in the runtime's ring and
    /// the rest of the source is dropped).
    pub fn read(&mut self, rt: &mut Runtime) -> Option<Value> {
        let tok = self.lexer.next()?;
        match self.read_expr(rt, tok) {
            Ok(value) => Some(value),
            Err(err) => {
                rt.record(err);
                None
            }
        }
    }

    fn read_expr(
        &mut self,
        rt: &mut Runtime,
        tok: Result<Token, ()>,
    ) -> Result<Value, RuntimeError> {
        match tok {
            Err(()) => Err(RuntimeError::MalformedInput),
            Ok(Token::Number) => self.read_number(),
            Ok(Token::Symbol) => self.read_symbol(rt),
            Ok(Token::Quote) => self.read_quote(rt),
            Ok(Token::LParen) => self.read_list(rt),
            // A stray closer at top level.
            Ok(Token::RParen) => Err(RuntimeError::MalformedInput),
        }
    }

    fn read_number(&mut self) -> Result<Value, RuntimeError> {
        let text = self.lexer.slice();
        let n: i64 = text.parse().map_err(|_| RuntimeError::IntegerOverflow)?;
        if !(INT_MIN..=INT_MAX).contains(&n) {
            return Err(RuntimeError::IntegerOverflow);
        }
        Ok(Value::int(n))
    }

    fn read_symbol(&mut self, rt: &mut Runtime) -> Result<Value, RuntimeError> {
        let name = self.lexer.slice();
        if name.len() > MAX_SYMBOL_LEN {
            return Err(RuntimeError::SymbolNameTooLong);
        }
        Ok(rt.intern(name))
    }

    /// `'x` reads as `(quote x)`.
    fn read_quote(&mut self, rt: &mut Runtime) -> Result<Value, RuntimeError> {
        let tok = self.lexer.next().ok_or(RuntimeError::MalformedInput)?;
        let inner = self.read_expr(rt, tok)?;

        let mut tail = rt.cons(inner, NIL);
        push_roots!(rt, tail);
        let quote = rt.intern("quote");
        Ok(rt.cons(quote, tail))
    }

    fn read_list(&mut self, rt: &mut Runtime) -> Result<Value, RuntimeError> {
        let mut head = NIL;
        let mut tail = NIL;
        push_roots!(rt, head, tail);

        loop {
            // Unterminated lists are malformed, matching the EOF boundary.
            let tok = self.lexer.next().ok_or(RuntimeError::MalformedInput)?;
            if tok == Ok(Token::RParen) {
                return Ok(head);
            }
            let value = self.read_expr(rt, tok)?;
            let cell = rt.cons(value, NIL);
            if head == NIL {
                head = cell;
            } else {
                set_cdr(tail, cell);
            }
            tail = cell;
        }
    }
}
