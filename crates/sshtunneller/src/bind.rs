//! Bind address sequences encoded as Python-style literals
//!
//! `remote_bind_addresses` and `local_bind_addresses` arrive as strings such as
//! `[('0.0.0.0', 80), ("127.0.0.1", 8080)]`. Accepted shapes:
//!
//! - outer `[...]` or `(...)`, items separated by commas, trailing comma allowed
//! - items are `('host', port)` or `['host', port]`
//! - a bare `('host', port)` is a one-element sequence
//! - strings in single or double quotes with `\\`, `\'`, `\"`, `\n`, `\t` escapes

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// One end of a forward
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BindAddress {
    pub host: String,
    pub port: u16,
}

impl BindAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host to bind or connect to; an empty host means every interface
    pub fn socket_host(&self) -> &str {
        if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    /// `host:port` suitable for `TcpListener::bind`
    pub fn socket_addr_string(&self) -> String {
        let host = self.socket_host();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr_string())
    }
}

/// Why a literal was rejected, with the byte offset it was rejected at
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at offset {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub reason: String,
}

/// Parse a bind-address literal into an ordered sequence
pub fn parse_bind_addresses(literal: &str) -> Result<Vec<BindAddress>, LiteralError> {
    let mut parser = Parser::new(literal);
    let addresses = parser.sequence()?;
    parser.skip_ws();
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected '{}' after sequence", c)));
    }
    if addresses.is_empty() {
        return Err(LiteralError {
            offset: 0,
            reason: "at least one (host, port) pair is required".to_string(),
        });
    }
    Ok(addresses)
}

/// Serialize a sequence back into the canonical literal form
pub fn format_bind_addresses(addresses: &[BindAddress]) -> String {
    let items: Vec<String> = addresses
        .iter()
        .map(|a| format!("('{}', {})", escape(&a.host), a.port))
        .collect();
    format!("[{}]", items.join(", "))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of input", want))),
        }
    }

    fn open(&mut self) -> Result<char, LiteralError> {
        self.skip_ws();
        match self.bump() {
            Some('[') => Ok(']'),
            Some('(') => Ok(')'),
            Some(c) => {
                self.pos -= c.len_utf8();
                Err(self.error(format!("expected '[' or '(', found '{}'", c)))
            }
            None => Err(self.error("expected '[' or '(', found end of input")),
        }
    }

    fn sequence(&mut self) -> Result<Vec<BindAddress>, LiteralError> {
        let close = self.open()?;
        self.skip_ws();

        // ('host', port) on its own
        if close == ')' && matches!(self.peek(), Some('\'') | Some('"')) {
            let address = self.pair_body(close)?;
            return Ok(vec![address]);
        }

        let mut addresses = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(addresses);
            }
            addresses.push(self.pair()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {}
                Some(c) => {
                    return Err(self.error(format!("expected ',' or '{}', found '{}'", close, c)))
                }
                None => return Err(self.error(format!("unterminated sequence, missing '{}'", close))),
            }
        }
    }

    fn pair(&mut self) -> Result<BindAddress, LiteralError> {
        let close = self.open()?;
        self.pair_body(close)
    }

    fn pair_body(&mut self, close: char) -> Result<BindAddress, LiteralError> {
        let host = self.string()?;
        self.expect(',')?;
        let port = self.port()?;
        self.skip_ws();
        if self.peek() == Some(',') {
            self.bump();
        }
        self.expect(close)?;
        Ok(BindAddress { host, port })
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            Some(c) => return Err(self.error(format!("expected quoted host, found '{}'", c))),
            None => return Err(self.error("expected quoted host, found end of input")),
        };
        let start = self.pos;
        self.bump();

        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => break,
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(LiteralError {
            offset: start,
            reason: "unterminated string".to_string(),
        })
    }

    fn port(&mut self) -> Result<u16, LiteralError> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.src[start..self.pos];
        if digits.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.error(format!("expected integer port, found '{}'", c)),
                None => self.error("expected integer port, found end of input"),
            });
        }
        digits.parse::<u16>().map_err(|_| LiteralError {
            offset: start,
            reason: format!("port {} is out of range (0-65535)", digits),
        })
    }
}
