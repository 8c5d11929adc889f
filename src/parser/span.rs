//! Locates the JSON-like region of a model reply.

/// Result of scanning from one opening delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Matching closer found; `end` is exclusive.
    Balanced { start: usize, end: usize },
    /// Text ended with delimiters still open.
    Open { start: usize },
    /// A closer that does not match the innermost opener.
    Mismatch { start: usize, offset: usize, found: char },
}

/// Byte offset of the next `{` or `[` at or after `from`.
pub fn next_opener(text: &str, from: usize) -> Option<usize> {
    text.get(from..)?
        .find(|c: char| c == '{' || c == '[')
        .map(|offset| from + offset)
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Code,
    Str { quote: u8, escaped: bool },
    LineComment,
    BlockComment,
}

/// Scans from the opener at `start`, honouring quoted strings and comments.
pub fn scan_from(text: &str, start: usize) -> Scan {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut state = State::Code;
    let mut index = start;

    while index < bytes.len() {
        let byte = bytes[index];
        match state {
            State::Str { quote, escaped } => {
                state = if escaped {
                    State::Str {
                        quote,
                        escaped: false,
                    }
                } else if byte == b'\\' {
                    State::Str {
                        quote,
                        escaped: true,
                    }
                } else if byte == quote {
                    State::Code
                } else {
                    state
                };
            }
            State::LineComment => {
                if byte == b'\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if byte == b'*' && bytes.get(index + 1) == Some(&b'/') {
                    state = State::Code;
                    index += 1;
                }
            }
            State::Code => match byte {
                b'"' | b'\'' => {
                    state = State::Str {
                        quote: byte,
                        escaped: false,
                    }
                }
                b'/' if bytes.get(index + 1) == Some(&b'/') => {
                    state = State::LineComment;
                    index += 1;
                }
                b'/' if bytes.get(index + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    index += 1;
                }
                b'{' => stack.push(b'}'),
                b'[' => stack.push(b']'),
                b'}' | b']' => {
                    if stack.pop() != Some(byte) {
                        return Scan::Mismatch {
                            start,
                            offset: index,
                            found: byte as char,
                        };
                    }
                    if stack.is_empty() {
                        return Scan::Balanced {
                            start,
                            end: index + 1,
                        };
                    }
                }
                _ => {}
            },
        }
        index += 1;
    }

    Scan::Open { start }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(text: &str) -> Scan {
        let start = next_opener(text, 0).expect("opener");
        scan_from(text, start)
    }

    #[test]
    fn skips_prose_and_fences() {
        let text = "Sure! Here you go:\n```json\n{\"a\": [1, 2]}\n```";
        let Scan::Balanced { start, end } = first(text) else {
            panic!("expected balanced span");
        };
        assert_eq!(&text[start..end], "{\"a\": [1, 2]}");
    }

    #[test]
    fn ignores_delimiters_in_strings_and_comments() {
        let text = r#"{a: "}", b: '{', // }
        /* ] */ c: "\"}"}"#;
        assert_eq!(
            first(text),
            Scan::Balanced {
                start: 0,
                end: text.len()
            }
        );
    }

    #[test]
    fn reports_mismatched_closer() {
        assert_eq!(
            first("{a: [1, 2}"),
            Scan::Mismatch {
                start: 0,
                offset: 9,
                found: '}'
            }
        );
    }

    #[test]
    fn unbalanced_text_stays_open() {
        assert_eq!(first("x {a: {b: 1}"), Scan::Open { start: 2 });
        assert_eq!(next_opener("no json here", 0), None);
    }
}
