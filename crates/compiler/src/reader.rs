//! Recursive-descent reader: tokens to an S-expression tree (spec §4.2),
//! following a subset of R5RS §7.1.2 (External Representations).

use schemey_core::{value::deep_eq, Value};

use crate::error::ReadError;
use crate::lexer::{Lexer, Token, TokenKind};

pub struct Reader<'a> {
    lexer: Lexer,
    source: &'a str,
    token: Option<Token>,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Reader {
            lexer: Lexer::new(source),
            source,
            token: None,
        }
    }

    /// Parse every top-level form in the source, in order.
    pub fn parse(&mut self) -> Result<Vec<Value>, ReadError> {
        self.advance()?;
        let mut datums = Vec::new();
        while self.token.is_some() {
            datums.push(self.datum()?);
        }
        Ok(datums)
    }

    fn advance(&mut self) -> Result<(), ReadError> {
        self.token = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ReadError {
        let bytes_before: Vec<(usize, char)> = self.source.char_indices().collect();
        let mut line = 1usize;
        let mut line_start_byte = 0usize;
        for &(byte_idx, ch) in &bytes_before {
            if byte_idx >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                line_start_byte = byte_idx + 1;
            }
        }
        let source_line = self
            .source
            .lines()
            .nth(line - 1)
            .unwrap_or("")
            .replace('\t', "");
        let column = offset.saturating_sub(line_start_byte);
        let caret = " ".repeat(column) + "^";
        ReadError::Syntax {
            line,
            column,
            source_line,
            caret,
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ReadError> {
        match self.token.clone() {
            Some(tok) if tok.kind == kind => {
                self.advance()?;
                Ok(tok)
            }
            Some(tok) => Err(self.error(tok.offset, format!("Expected {what}. Found {:?}", tok.kind))),
            None => Err(self.error(self.source.len(), format!("Expected {what}. Found end of input"))),
        }
    }

    fn datum(&mut self) -> Result<Value, ReadError> {
        match self.token.clone() {
            Some(tok) if tok.kind == TokenKind::LParen => self.list(),
            Some(tok) if tok.kind == TokenKind::Quote => self.abbreviation(),
            Some(_) => self.simple_datum(),
            None => Err(self.error(self.source.len(), "Unexpected end of input")),
        }
    }

    fn abbreviation(&mut self) -> Result<Value, ReadError> {
        self.expect(TokenKind::Quote, "'")?;
        let datum = self.datum()?;
        Ok(Value::cons(
            Value::symbol("quote"),
            Value::cons(datum, Value::Nil),
        ))
    }

    fn simple_datum(&mut self) -> Result<Value, ReadError> {
        let tok = self.token.clone().expect("checked by caller");
        let value = match tok.kind {
            TokenKind::Boolean => Value::Boolean(tok.text == "#t"),
            TokenKind::Number => Value::Integer(tok.text.parse::<i32>().map_err(|_| {
                self.error(tok.offset, format!("Number literal out of range: {}", tok.text))
            })?),
            TokenKind::Identifier => Value::symbol(&tok.text),
            _ => return Err(self.error(tok.offset, format!("Unexpected token: {}", tok.text))),
        };
        self.advance()?;
        Ok(value)
    }

    /// Parse a list, tracking at most one dotted index among the collected
    /// datums, then fold right-to-left into nested pairs.
    fn list(&mut self) -> Result<Value, ReadError> {
        let lparen_offset = self.token.as_ref().unwrap().offset;
        self.expect(TokenKind::LParen, "(")?;

        let mut datums: Vec<Value> = Vec::new();
        let mut dot_index: Option<usize> = None;

        loop {
            match self.token.clone() {
                None => {
                    return Err(self.error(lparen_offset, "Unmatched parentheses at end of input"));
                }
                Some(tok) if tok.kind == TokenKind::RParen => break,
                Some(tok) if tok.kind == TokenKind::Identifier && tok.text == "." => {
                    if dot_index.is_some() {
                        return Err(self.error(tok.offset, "Invalid position of \".\" in list"));
                    }
                    dot_index = Some(datums.len());
                    self.advance()?;
                }
                _ => datums.push(self.datum()?),
            }
        }
        self.expect(TokenKind::RParen, ")")?;

        let mut tail = Value::Nil;
        let proper_items: Vec<Value> = if let Some(idx) = dot_index {
            if idx != datums.len() - 1 {
                return Err(self.error(lparen_offset, "Invalid position of \".\" in list"));
            }
            tail = datums.pop().expect("dotted list has a tail datum");
            datums
        } else {
            datums
        };
        for item in proper_items.into_iter().rev() {
            tail = Value::cons(item, tail);
        }
        Ok(tail)
    }
}

/// Parse every top-level form in `source`.
pub fn read_all(source: &str) -> Result<Vec<Value>, ReadError> {
    Reader::new(source).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_atoms() {
        let forms = read_all("42 #t foo").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0], Value::Integer(42));
        assert_eq!(forms[1], Value::Boolean(true));
        assert_eq!(forms[2], Value::symbol("foo"));
    }

    #[test]
    fn reads_a_proper_list() {
        let forms = read_all("(1 2 3)").unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].expand_list(), vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3)
        ]);
    }

    #[test]
    fn reads_a_dotted_pair() {
        let forms = read_all("(a . b)").unwrap();
        let pair = forms[0].as_pair().unwrap();
        assert_eq!(pair.car(), Value::symbol("a"));
        assert_eq!(pair.cdr(), Value::symbol("b"));
    }

    #[test]
    fn rejects_multiple_dots() {
        let err = read_all("(a . b . c)");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_misplaced_dot() {
        let err = read_all("(. a b)");
        assert!(err.is_err());
    }

    #[test]
    fn quote_expands_to_quote_pair() {
        let forms = read_all("'x").unwrap();
        let pair = forms[0].as_pair().unwrap();
        assert_eq!(pair.car(), Value::symbol("quote"));
        assert_eq!(pair.cdr().as_pair().unwrap().car(), Value::symbol("x"));
    }

    #[test]
    fn unmatched_paren_is_an_error() {
        assert!(read_all("(1 2 3").is_err());
    }

    #[test]
    fn round_trip_without_quote_sugar() {
        let forms = read_all("(define (f x) (if (= x 0) 1 (* x x)))").unwrap();
        let printed = forms[0].to_string();
        let reparsed = read_all(&printed).unwrap();
        assert!(deep_eq(&forms[0], &reparsed[0]));
    }
}
