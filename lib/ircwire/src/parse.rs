//! Deterministic recursive-descent parser for the IRC line grammar.
//!
//! Every production either succeeds consuming a prefix of the stream or
//! fails having consumed nothing; backtracking happens only through
//! [`CharStream::attempt`].

use crate::message::{RawCommand, RawMessage, RawPrefix};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: usize,
    pub expected: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected {} at byte {}", self.expected, self.pos)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Byte cursor over one line, terminator already stripped.
pub struct CharStream<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> CharStream<'a> {
    pub fn new(input: &'a str) -> CharStream<'a> {
        CharStream { input, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn fail<T>(&self, expected: &'static str) -> ParseResult<T> {
        Err(ParseError {
            pos: self.pos,
            expected,
        })
    }

    fn symbol(&mut self, symbol: u8, expected: &'static str) -> ParseResult<()> {
        match self.peek() {
            Some(b) if b == symbol => {
                self.pos += 1;
                Ok(())
            }
            _ => self.fail(expected),
        }
    }

    fn satisfy<P: Fn(u8) -> bool>(&mut self, pred: P, expected: &'static str) -> ParseResult<u8> {
        match self.peek() {
            Some(b) if pred(b) => {
                self.pos += 1;
                Ok(b)
            }
            _ => self.fail(expected),
        }
    }

    fn consume_while<P: Fn(u8) -> bool>(&mut self, pred: P) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// Runs a production, restoring the position when it fails.
    fn attempt<T, F>(&mut self, production: F) -> ParseResult<T>
    where
        F: FnOnce(&mut CharStream<'a>) -> ParseResult<T>,
    {
        let saved = self.pos;
        let result = production(self);
        if result.is_err() {
            self.pos = saved;
        }
        result
    }

    fn maybe<T, F>(&mut self, production: F) -> Option<T>
    where
        F: FnOnce(&mut CharStream<'a>) -> ParseResult<T>,
    {
        self.attempt(production).ok()
    }
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_special(b: u8) -> bool {
    matches!(b, b'-' | b'[' | b']' | b'\\' | b'`' | b'^' | b'{' | b'}')
}

fn is_hostname_char(b: u8) -> bool {
    is_alpha(b) || is_digit(b) || b == b'-' || b == b'.'
}

fn is_middle_char(b: u8) -> bool {
    !matches!(b, b'\n' | b'\r' | b'\0' | b' ')
}

fn is_trailing_char(b: u8) -> bool {
    !matches!(b, b'\n' | b'\r' | b'\0')
}

/// Parses one complete line into a [`RawMessage`]. The whole input must be
/// consumed.
pub fn parse_message(line: &str) -> ParseResult<RawMessage> {
    let mut stream = CharStream::new(line);
    let message = parse_raw_message(&mut stream)?;
    if stream.remaining() > 0 {
        return stream.fail("end of input");
    }
    Ok(message)
}

pub fn parse_raw_message<'a>(s: &mut CharStream<'a>) -> ParseResult<RawMessage> {
    let prefix = s.maybe(|s| {
        s.symbol(b':', "':'")?;
        let prefix = parse_prefix(s)?;
        if s.consume_while(|b| b == b' ').is_empty() {
            return s.fail("space after prefix");
        }
        Ok(prefix)
    });

    let name = parse_command_id(s)?;
    s.consume_while(|b| b == b' ');

    let parameters = if s.remaining() > 0 {
        parse_params(s)?
    } else {
        Vec::new()
    };

    let trailing = if s.peek() == Some(b':') {
        s.symbol(b':', "':'")?;
        Some(s.consume_while(is_trailing_char).to_string())
    } else {
        None
    };

    Ok(RawMessage {
        prefix,
        command: RawCommand {
            name,
            parameters,
            trailing,
        },
    })
}

/// `name ['@' hostname] ['!' username]`, both optional parts accepted in
/// either order so the `nick!user@host` form clients emit parses too.
pub fn parse_prefix<'a>(s: &mut CharStream<'a>) -> ParseResult<RawPrefix> {
    let name = parse_nickname(s)?;
    let mut hostname = None;
    let mut username = None;

    loop {
        match s.peek() {
            Some(b'@') if hostname.is_none() => {
                s.symbol(b'@', "'@'")?;
                hostname = Some(parse_hostname(s)?);
            }
            Some(b'!') if username.is_none() => {
                s.symbol(b'!', "'!'")?;
                username = Some(parse_nickname(s)?);
            }
            _ => break,
        }
    }

    Ok(RawPrefix {
        name,
        hostname,
        username,
    })
}

/// An alphabetic word, or exactly three digits followed by a space or the
/// end of the line.
pub fn parse_command_id<'a>(s: &mut CharStream<'a>) -> ParseResult<String> {
    let word = s.attempt(|s| {
        let word = s.consume_while(is_alpha);
        if word.is_empty() {
            return s.fail("command word");
        }
        Ok(word.to_string())
    });
    if let Ok(word) = word {
        return Ok(word);
    }

    s.attempt(|s| {
        let mut digits = String::with_capacity(3);
        for _ in 0..3 {
            digits.push(s.satisfy(is_digit, "digit")? as char);
        }
        match s.peek() {
            None | Some(b' ') => Ok(digits),
            _ => s.fail("space after numeric command"),
        }
    })
}

pub fn parse_params<'a>(s: &mut CharStream<'a>) -> ParseResult<Vec<String>> {
    let mut params = Vec::new();
    loop {
        s.consume_while(|b| b == b' ');
        match s.peek() {
            None | Some(b':') => return Ok(params),
            Some(_) => {
                params.push(parse_middle(s)?);
                s.consume_while(|b| b == b' ');
                if s.remaining() == 0 {
                    return Ok(params);
                }
            }
        }
    }
}

/// A middle never starts with `:` and never contains a space.
pub fn parse_middle<'a>(s: &mut CharStream<'a>) -> ParseResult<String> {
    let mut accum = String::new();
    accum.push(s.satisfy(|b| is_middle_char(b) && b != b':', "middle")? as char);
    accum.push_str(s.consume_while(is_middle_char));
    Ok(accum)
}

pub fn parse_hostname<'a>(s: &mut CharStream<'a>) -> ParseResult<String> {
    let hostname = s.consume_while(is_hostname_char);
    if hostname.is_empty() {
        return s.fail("hostname");
    }
    Ok(hostname.to_string())
}

/// `alpha (alpha | digit | special)*`
pub fn parse_nickname<'a>(s: &mut CharStream<'a>) -> ParseResult<String> {
    let mut accum = String::new();
    accum.push(s.satisfy(is_alpha, "nickname")? as char);
    accum.push_str(s.consume_while(|b| is_alpha(b) || is_digit(b) || is_special(b)));
    Ok(accum)
}

/// True when the whole input is one well-formed nickname.
pub fn is_valid_nickname(input: &str) -> bool {
    let mut stream = CharStream::new(input);
    parse_nickname(&mut stream).is_ok() && stream.remaining() == 0
}
