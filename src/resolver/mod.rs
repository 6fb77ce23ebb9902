//! Address resolution.
//!
//! Turns RFC 5322 mailbox strings into [`Address`] values. Accepted forms:
//! `user@host`, `user@host (Comment Name)`, `<user@host>`,
//! `Name <user@host>`, `"Quoted, Name" <user@host>` and quoted local parts
//! such as `"john doe"@host`. Comments may appear wherever whitespace may.
//! Line breaks are never folding whitespace here, so a CR or LF anywhere in
//! the input rejects it.

use crate::errors::{SmtpError, SmtpResult};
use crate::types::Address;

/// Maximum length of an address (RFC 5321).
const MAX_ADDRESS_LEN: usize = 254;

/// Maximum length of the local part.
const MAX_LOCAL_LEN: usize = 64;

/// Maximum length of one domain label.
const MAX_LABEL_LEN: usize = 63;

type Reason = &'static str;

/// Resolves a single mailbox string.
pub fn resolve_one(input: &str) -> SmtpResult<Address> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SmtpError::invalid_address("Address cannot be empty"));
    }

    // addr-spec is the stricter grammar, so it is tried first.
    let spec_err = match Cursor::new(s).bare_mailbox() {
        Ok(address) => return Ok(address),
        Err(reason) => reason,
    };

    Cursor::new(s).name_addr().map_err(|reason| {
        let reason = if s.contains('<') { reason } else { spec_err };
        SmtpError::invalid_address(format!("{}: {}", reason, s))
    })
}

/// Resolves every input in order, stopping at the first invalid entry.
pub fn resolve_many<I, S>(inputs: I) -> SmtpResult<Vec<Address>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            resolve_one(input.as_ref()).map_err(|e| {
                SmtpError::invalid_address(format!("entry {}: {}", i, e.message()))
            })
        })
        .collect()
}

/// Resolves an address that may be left blank.
///
/// Empty or whitespace-only input yields `None` rather than an error.
pub fn resolve_optional(input: &str) -> SmtpResult<Option<Address>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    resolve_one(input).map(Some)
}

/// RFC 5322 `atext`, extended to non-ASCII text (RFC 6532).
fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || "!#$%&'*+-/=?^_`{|}~".contains(c)
        || (!c.is_ascii() && !c.is_control() && !c.is_whitespace())
}

fn is_dot_atom(s: &str) -> bool {
    s.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
}

/// Collapses runs of whitespace in a comment; empty names become `None`.
fn comment_name(words: &str) -> Option<String> {
    let name = words.split_whitespace().collect::<Vec<_>>().join(" ");
    (!name.is_empty()).then_some(name)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos == self.src.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    /// Skips whitespace and comments, returning the text of the last comment.
    fn skip_cfws(&mut self) -> Result<Option<String>, Reason> {
        let mut last = None;
        loop {
            self.skip_ws();
            if !self.eat('(') {
                return Ok(last);
            }
            last = Some(self.comment()?);
        }
    }

    /// Reads a comment body after its `(`; nested comments are kept as text.
    fn comment(&mut self) -> Result<String, Reason> {
        let mut text = String::new();
        let mut depth = 1;
        loop {
            match self.bump() {
                None => return Err("Unterminated comment"),
                Some('\\') => text.push(self.escaped()?),
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(text);
                    }
                    text.push(')');
                }
                Some(c) if c.is_control() && c != '\t' => {
                    return Err("Control character in comment")
                }
                Some(c) => text.push(c),
            }
        }
    }

    /// Reads a quoted string after its opening `"`, unescaping `\x` pairs.
    fn quoted_string(&mut self) -> Result<String, Reason> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err("Unterminated quoted string"),
                Some('\\') => text.push(self.escaped()?),
                Some('"') => return Ok(text),
                Some(c) if c.is_control() && c != '\t' => {
                    return Err("Control character in quoted string")
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn escaped(&mut self) -> Result<char, Reason> {
        match self.bump() {
            Some(c) if !c.is_control() || c == '\t' => Ok(c),
            _ => Err("Invalid escape"),
        }
    }

    /// Consumes a run of atext, plus `.` when `dots` is set.
    fn atom(&mut self, dots: bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(is_atext(c) || (dots && c == '.')) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// `atom *("." atom)` with no empty atoms.
    fn dot_atom(&mut self) -> Result<&'a str, Reason> {
        let start = self.pos;
        loop {
            if self.atom(false).is_empty() {
                return Err("Leading, trailing or doubled dot");
            }
            if !self.eat('.') {
                return Ok(&self.src[start..self.pos]);
            }
        }
    }

    /// `local-part "@" domain`, returned in canonical form.
    fn addr_spec(&mut self) -> Result<String, Reason> {
        let local = if self.eat('"') {
            let local = self.quoted_string()?;
            if is_dot_atom(&local) {
                local
            } else {
                format!("\"{}\"", local.replace('\\', "\\\\").replace('"', "\\\""))
            }
        } else if self.peek().is_some_and(is_atext) || self.peek() == Some('.') {
            self.dot_atom()?.to_string()
        } else {
            return Err("Missing local part");
        };

        if !self.eat('@') {
            return Err("Email address must contain exactly one @");
        }

        let domain = if self.eat('[') {
            self.domain_literal()?
        } else {
            let domain = self.dot_atom().map_err(|_| "Domain is malformed")?;
            let valid_label = |label: &str| {
                label.chars().count() <= MAX_LABEL_LEN
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_alphanumeric() || c == '-')
            };
            if !domain.split('.').all(valid_label) {
                return Err("Domain is malformed");
            }
            domain.to_string()
        };

        if local.len() > MAX_LOCAL_LEN {
            return Err("Local part must be 1-64 characters");
        }
        let email = format!("{}@{}", local, domain);
        if email.len() > MAX_ADDRESS_LEN {
            return Err("Email address too long");
        }
        Ok(email)
    }

    /// `[dtext]` after the opening bracket.
    fn domain_literal(&mut self) -> Result<String, Reason> {
        let start = self.pos;
        while let Some(c) = self.bump() {
            match c {
                ']' if self.pos - 1 > start => {
                    return Ok(format!("[{}]", &self.src[start..self.pos - 1]));
                }
                '!'..='Z' | '^'..='~' => {}
                _ => break,
            }
        }
        Err("Domain literal is malformed")
    }

    /// `addr-spec`, optionally followed by a comment used as display name.
    fn bare_mailbox(mut self) -> Result<Address, Reason> {
        self.skip_cfws()?;
        let email = self.addr_spec()?;
        let comment = self.skip_cfws()?;
        if !self.at_end() {
            return Err("Unexpected text after address");
        }
        Ok(Address {
            name: comment.as_deref().and_then(comment_name),
            email,
        })
    }

    /// `[phrase] "<" addr-spec ">"` with optional comments around it.
    fn name_addr(mut self) -> Result<Address, Reason> {
        let mut words = Vec::new();
        loop {
            self.skip_cfws()?;
            if self.eat('"') {
                words.push(self.quoted_string()?);
                continue;
            }
            let word = self.atom(true);
            if word.is_empty() {
                break;
            }
            words.push(word.to_string());
        }

        if !self.eat('<') {
            return Err(if self.at_end() {
                "Missing angle-bracketed address"
            } else {
                "Unexpected character in display name"
            });
        }
        self.skip_ws();
        let email = self.addr_spec()?;
        self.skip_ws();
        if !self.eat('>') {
            return Err("Malformed angle address");
        }
        self.skip_cfws()?;
        if !self.at_end() {
            return Err("Unexpected text after address");
        }

        words.retain(|word| !word.trim().is_empty());
        Ok(Address {
            name: (!words.is_empty()).then(|| words.join(" ")),
            email,
        })
    }
}
