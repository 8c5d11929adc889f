//! Near-JSON to strict JSON.
//!
//! Accepts what models tend to write: bare or single-quoted keys, comments,
//! trailing or missing commas, pythonic literals, unquoted words. In
//! [`Mode::Repair`] an unbalanced prefix is closed off so that a streaming
//! buffer can be decoded before the model finishes.

use serde_json::Value;
use thiserror::Error;

use crate::union::ACTION_TAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Strict,
    /// Close open strings and containers; drop dangling keys and any
    /// trailing token that may still grow.
    Repair,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LenientError {
    #[error("malformed number `{text}`")]
    MalformedNumber { offset: usize, text: String },

    #[error("key `{key}` is not followed by `:`")]
    MissingColon { offset: usize, key: String },

    #[error("unexpected `{token}`")]
    UnexpectedToken { offset: usize, token: String },

    #[error("input ended inside a value")]
    UnexpectedEnd { offset: usize },

    #[error("unterminated string")]
    UnterminatedString { offset: usize },

    #[error("unterminated comment")]
    UnterminatedComment { offset: usize },
}

impl LenientError {
    pub fn offset(&self) -> usize {
        match self {
            LenientError::MalformedNumber { offset, .. }
            | LenientError::MissingColon { offset, .. }
            | LenientError::UnexpectedToken { offset, .. }
            | LenientError::UnexpectedEnd { offset }
            | LenientError::UnterminatedString { offset }
            | LenientError::UnterminatedComment { offset } => *offset,
        }
    }

    /// The text was cut short rather than malformed.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            LenientError::UnexpectedEnd { .. }
                | LenientError::UnterminatedString { .. }
                | LenientError::UnterminatedComment { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Open(u8),
    Close(u8),
    Colon,
    Comma,
    Str { value: String, closed: bool },
    Number,
    Word,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

/// Normalizes `src`, which must start at an opening `{` or `[`.
pub fn normalize(src: &str, mode: Mode) -> Result<String, LenientError> {
    let tokens = tokenize(src, mode)?;
    let mut normalizer = Normalizer {
        src,
        tokens,
        pos: 0,
        mode,
    };
    normalizer
        .value(false)?
        .ok_or(LenientError::UnexpectedEnd { offset: src.len() })
}

/// Strict JSON number grammar.
pub fn is_json_number(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = integer_part(bytes);
    if i == 0 {
        return false;
    }
    if bytes.get(i) == Some(&b'.') {
        let digits = count_digits(&bytes[i + 1..]);
        if digits == 0 {
            return false;
        }
        i += 1 + digits;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let digits = count_digits(&bytes[i.min(bytes.len())..]);
        if digits == 0 {
            return false;
        }
        i += digits;
    }
    i == bytes.len()
}

/// Strict JSON integer grammar: optional minus, no leading zeros.
pub fn is_json_integer(text: &str) -> bool {
    let bytes = text.as_bytes();
    let i = integer_part(bytes);
    i != 0 && i == bytes.len()
}

/// Length of `-?(0|[1-9][0-9]*)` at the start of `bytes`, or 0.
fn integer_part(bytes: &[u8]) -> usize {
    let sign = usize::from(bytes.first() == Some(&b'-'));
    match bytes.get(sign) {
        Some(b'0') => sign + 1,
        Some(b'1'..=b'9') => sign + count_digits(&bytes[sign..]),
        _ => 0,
    }
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || b"{}[]:,\"'".contains(&byte)
}

fn starts_comment(bytes: &[u8], at: usize) -> bool {
    bytes[at] == b'/' && matches!(bytes.get(at + 1), Some(b'/' | b'*'))
}

fn tokenize(src: &str, mode: Mode) -> Result<Vec<Token>, LenientError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if byte == b'/' && bytes.get(i + 1) == Some(&b'/') {
            i = src[i..].find('\n').map_or(bytes.len(), |nl| i + nl + 1);
            continue;
        }
        if byte == b'/' && bytes.get(i + 1) == Some(&b'*') {
            match src[i + 2..].find("*/") {
                Some(close) => i += close + 4,
                None if mode == Mode::Repair => break,
                None => return Err(LenientError::UnterminatedComment { offset: i }),
            }
            continue;
        }

        let single = move |kind| Token {
            kind,
            start: i,
            end: i + 1,
        };
        match byte {
            b'{' | b'[' => {
                tokens.push(single(Kind::Open(byte)));
                i += 1;
            }
            b'}' | b']' => {
                tokens.push(single(Kind::Close(byte)));
                i += 1;
            }
            b':' => {
                tokens.push(single(Kind::Colon));
                i += 1;
            }
            b',' => {
                tokens.push(single(Kind::Comma));
                i += 1;
            }
            b'"' | b'\'' => {
                let token = string(src, i, mode)?;
                i = token.end;
                tokens.push(token);
            }
            _ => {
                let start = i;
                while i < bytes.len() && !is_delimiter(bytes[i]) && !starts_comment(bytes, i) {
                    i += 1;
                }
                let numeric = byte.is_ascii_digit()
                    || (matches!(byte, b'-' | b'+' | b'.')
                        && bytes.get(start + 1).is_some_and(u8::is_ascii_digit));
                tokens.push(Token {
                    kind: if numeric { Kind::Number } else { Kind::Word },
                    start,
                    end: i,
                });
            }
        }
    }

    Ok(tokens)
}

enum Hex {
    Value(u32),
    Truncated,
    Invalid,
}

fn hex4(src: &str, at: usize) -> Hex {
    let rest = src.get(at..).unwrap_or_default();
    match rest.get(..4) {
        Some(digits) if digits.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u32::from_str_radix(digits, 16).map_or(Hex::Invalid, Hex::Value)
        }
        Some(_) => Hex::Invalid,
        None if rest.bytes().all(|b| b.is_ascii_hexdigit()) => Hex::Truncated,
        None => Hex::Invalid,
    }
}

/// Decodes a quoted string starting at `start`.
fn string(src: &str, start: usize, mode: Mode) -> Result<Token, LenientError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut value = String::new();
    let mut i = start + 1;

    // Every `break` below means the text ended mid-string.
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == quote {
            return Ok(Token {
                kind: Kind::Str {
                    value,
                    closed: true,
                },
                start,
                end: i + 1,
            });
        }
        if byte != b'\\' {
            let Some(ch) = src[i..].chars().next() else {
                break;
            };
            value.push(ch);
            i += ch.len_utf8();
            continue;
        }

        let Some(&escape) = bytes.get(i + 1) else {
            break;
        };
        i += 2;
        let decoded = match escape {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'u' => match hex4(src, i) {
                Hex::Truncated => break,
                Hex::Invalid => {
                    value.push_str("\\u");
                    continue;
                }
                Hex::Value(high @ 0xD800..=0xDBFF) => {
                    i += 4;
                    let rest = &src[i..];
                    if rest.is_empty() || rest == "\\" {
                        break;
                    }
                    if !rest.starts_with("\\u") {
                        value.push(char::REPLACEMENT_CHARACTER);
                        continue;
                    }
                    match hex4(src, i + 2) {
                        Hex::Truncated => break,
                        Hex::Value(low @ 0xDC00..=0xDFFF) => {
                            i += 6;
                            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                            char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                        }
                        _ => char::REPLACEMENT_CHARACTER,
                    }
                }
                Hex::Value(code) => {
                    i += 4;
                    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                }
            },
            other => {
                // `\"`, `\'`, `\\`, `\/` and unknown escapes keep the character.
                let Some(ch) = src[i - 1..].chars().next() else {
                    break;
                };
                i += ch.len_utf8() - 1;
                if other.is_ascii() {
                    other as char
                } else {
                    ch
                }
            }
        };
        value.push(decoded);
    }

    match mode {
        Mode::Strict => Err(LenientError::UnterminatedString { offset: start }),
        Mode::Repair => Ok(Token {
            kind: Kind::Str {
                value,
                closed: false,
            },
            start,
            end: src.len(),
        }),
    }
}

struct Normalizer<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    mode: Mode,
}

impl Normalizer<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn unexpected(&self, token: &Token) -> LenientError {
        LenientError::UnexpectedToken {
            offset: token.start,
            token: self.src[token.start..token.end].to_string(),
        }
    }

    /// Closes a container cut off by the end of input.
    fn close(&self, mut out: String, closer: char) -> Result<String, LenientError> {
        match self.mode {
            Mode::Repair => {
                out.push(closer);
                Ok(out)
            }
            Mode::Strict => Err(LenientError::UnexpectedEnd {
                offset: self.src.len(),
            }),
        }
    }

    fn at_end(&self, token: &Token) -> bool {
        self.mode == Mode::Repair && token.end == self.src.len()
    }

    fn skip_commas(&mut self) {
        while matches!(self.peek(), Some(Token { kind: Kind::Comma, .. })) {
            self.pos += 1;
        }
    }

    /// `None` means the value was dropped because the input ended inside it.
    fn value(&mut self, guarded: bool) -> Result<Option<String>, LenientError> {
        let Some(token) = self.peek().cloned() else {
            return match self.mode {
                Mode::Repair => Ok(None),
                Mode::Strict => Err(LenientError::UnexpectedEnd {
                    offset: self.src.len(),
                }),
            };
        };
        self.pos += 1;

        match &token.kind {
            Kind::Open(b'{') => self.object().map(Some),
            Kind::Open(_) => self.array().map(Some),
            Kind::Str { closed: false, .. } if guarded => Ok(None),
            Kind::Str { value, .. } => Ok(Some(quote(value))),
            Kind::Number => {
                if self.at_end(&token) {
                    return Ok(None);
                }
                let raw = &self.src[token.start..token.end];
                let unsigned = raw.strip_prefix('+').unwrap_or(raw);
                if is_json_number(unsigned) {
                    Ok(Some(unsigned.to_string()))
                } else {
                    Err(LenientError::MalformedNumber {
                        offset: token.start,
                        text: raw.to_string(),
                    })
                }
            }
            Kind::Word => self.words(&token),
            Kind::Close(_) | Kind::Colon | Kind::Comma => Err(self.unexpected(&token)),
        }
    }

    /// Joins consecutive bare words into one value, stopping before a key.
    /// Numbers after the first word belong to the run.
    fn words(&mut self, first: &Token) -> Result<Option<String>, LenientError> {
        let mut last = first.clone();
        while let Some(next) = self.peek() {
            let is_key = matches!(
                self.tokens.get(self.pos + 1),
                Some(Token {
                    kind: Kind::Colon,
                    ..
                })
            );
            if !matches!(next.kind, Kind::Word | Kind::Number) || is_key {
                break;
            }
            last = next.clone();
            self.pos += 1;
        }
        if self.at_end(&last) {
            return Ok(None);
        }

        let text = &self.src[first.start..last.end];
        let literal = match text {
            "true" | "True" => "true".to_string(),
            "false" | "False" => "false".to_string(),
            "null" | "None" => "null".to_string(),
            other => quote(other),
        };
        Ok(Some(literal))
    }

    fn object(&mut self) -> Result<String, LenientError> {
        let mut out = String::from("{");
        let mut first = true;
        loop {
            self.skip_commas();
            let Some(token) = self.peek().cloned() else {
                return self.close(out, '}');
            };
            let key = match &token.kind {
                Kind::Close(b'}') => {
                    self.pos += 1;
                    out.push('}');
                    return Ok(out);
                }
                // A key still being written.
                Kind::Str { closed: false, .. } => return self.close(out, '}'),
                Kind::Str { value, .. } => value.clone(),
                Kind::Word | Kind::Number => self.src[token.start..token.end].to_string(),
                _ => return Err(self.unexpected(&token)),
            };
            self.pos += 1;

            match self.peek() {
                None => return self.close(out, '}'),
                Some(Token {
                    kind: Kind::Colon, ..
                }) => self.pos += 1,
                Some(_) => {
                    return Err(LenientError::MissingColon {
                        offset: token.start,
                        key,
                    })
                }
            }

            let Some(value) = self.value(key == ACTION_TAG)? else {
                return self.close(out, '}');
            };
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(&quote(&key));
            out.push(':');
            out.push_str(&value);
        }
    }

    fn array(&mut self) -> Result<String, LenientError> {
        let mut out = String::from("[");
        let mut first = true;
        loop {
            self.skip_commas();
            match self.peek() {
                None => return self.close(out, ']'),
                Some(Token {
                    kind: Kind::Close(b']'),
                    ..
                }) => {
                    self.pos += 1;
                    out.push(']');
                    return Ok(out);
                }
                Some(_) => {}
            }
            let Some(value) = self.value(false)? else {
                return self.close(out, ']');
            };
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(&value);
        }
    }
}
