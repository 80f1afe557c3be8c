//! Recursive-descent parser from source text into [`Value`](super::Value).
//!
//! There is no off-the-shelf crate for condo's small symbolic-expression
//! dialect (role records, matcher expressions, watcher values all share
//! it), so this is hand-rolled: one function per node kind, explicit
//! errors, no panics on malformed input.

use super::Value;
use crate::error::ParseError;

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

pub fn parse(src: &str) -> PResult<Value> {
    let mut cur = Cursor { src, pos: 0 };
    cur.skip_trivia();
    let value = cur.parse_value()?;
    cur.skip_trivia();
    if !cur.at_end() {
        return Err(ParseError::new(format!(
            "trailing input after top-level value at byte {}",
            cur.pos
        )));
    }
    Ok(value)
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> PResult<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(ParseError::new(format!(
                "expected '{expected}', found '{c}' at byte {}",
                self.pos
            ))),
            None => Err(ParseError::new(format!(
                "expected '{expected}', found end of input"
            ))),
        }
    }

    fn parse_value(&mut self) -> PResult<Value> {
        self.skip_trivia();
        match self.peek() {
            None => Err(ParseError::new("unexpected end of input")),
            Some('(') => self.parse_seq('(', ')').map(Value::List),
            Some('[') => self.parse_seq('[', ']').map(Value::Vector),
            Some('{') => self.parse_map(),
            Some('#') => self.parse_hash(),
            Some('"') => self.parse_string().map(Value::Str),
            Some(':') => self.parse_keyword().map(Value::Keyword),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('-') if self.looks_like_number() => self.parse_number(),
            Some(_) => self.parse_symbol_or_literal(),
        }
    }

    fn looks_like_number(&self) -> bool {
        self.rest()
            .chars()
            .nth(1)
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
    }

    fn parse_seq(&mut self, open: char, close: char) -> PResult<Vec<Value>> {
        self.expect_char(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.bump();
                break;
            }
            if self.at_end() {
                return Err(ParseError::new(format!(
                    "unterminated sequence, expected '{close}'"
                )));
            }
            items.push(self.parse_value()?);
        }
        Ok(items)
    }

    fn parse_map(&mut self) -> PResult<Value> {
        self.expect_char('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.bump();
                break;
            }
            if self.at_end() {
                return Err(ParseError::new("unterminated map, expected '}'"));
            }
            let key = self.parse_value()?;
            self.skip_trivia();
            let val = self.parse_value()?;
            entries.push((key, val));
        }
        Ok(Value::Map(entries))
    }

    /// Dispatches on `#` — either a set literal `#{...}` or a tagged
    /// literal `#ns/name payload` (e.g. `#condo/watcher "k"`).
    fn parse_hash(&mut self) -> PResult<Value> {
        self.expect_char('#')?;
        if self.peek() == Some('{') {
            return self.parse_seq('{', '}').map(Value::Set);
        }

        let tag = self.parse_bare_token()?;
        let (ns, name) = tag.split_once('/').ok_or_else(|| {
            ParseError::new(format!("tagged literal '#{tag}' must be namespaced as #ns/name"))
        })?;

        self.skip_trivia();
        let payload = self.parse_value()?;
        Ok(Value::Tagged(ns.to_string(), name.to_string(), Box::new(payload)))
    }

    fn parse_string(&mut self) -> PResult<String> {
        self.expect_char('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new("unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('"' | '\\')) => out.push(c),
                    Some(c) => out.push(c),
                    None => return Err(ParseError::new("unterminated escape in string literal")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn parse_keyword(&mut self) -> PResult<String> {
        self.expect_char(':')?;
        let tok = self.parse_bare_token()?;
        if tok.is_empty() {
            return Err(ParseError::new("empty keyword after ':'"));
        }
        Ok(tok)
    }

    fn parse_number(&mut self) -> PResult<Value> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|e| ParseError::new(format!("invalid float literal '{text}': {e}")))
        } else {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|e| ParseError::new(format!("invalid integer literal '{text}': {e}")))
        }
    }

    fn parse_symbol_or_literal(&mut self) -> PResult<Value> {
        let tok = self.parse_bare_token()?;
        match tok.as_str() {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "" => Err(ParseError::new(format!(
                "unexpected character at byte {}",
                self.pos
            ))),
            _ => Ok(Value::Symbol(tok)),
        }
    }

    /// A run of non-whitespace, non-delimiter characters.
    fn parse_bare_token(&mut self) -> PResult<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || "()[]{}\"#,;:".contains(c) {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(ParseError::new(format!(
                "expected a token at byte {}, found '{:?}'",
                self.pos,
                self.peek()
            )));
        }
        Ok(self.src[start..self.pos].to_string())
    }
}
