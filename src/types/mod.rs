//! Core types for the notification service.
//!
//! This module provides:
//! - Mailbox addresses with header and envelope forms
//! - The composed message and its rendered wire form
//! - The envelope handed to the transport
//! - Send result types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::compose::encode_word;
use crate::errors::SmtpError;
use crate::resolver;

/// Extra headers supplied by callers: header name to one or more values.
pub type HeaderMap = HashMap<String, Vec<String>>;

/// A mailbox: bare address plus an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Phrase shown before the address, without quotes.
    pub name: Option<String>,
    /// Bare `local@domain`.
    pub email: String,
}

impl Address {
    /// Parses a mailbox string such as `"John Doe" <john@example.com>`.
    pub fn parse(s: &str) -> Result<Self, SmtpError> {
        resolver::resolve_one(s)
    }

    /// Bare address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Display name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Angle-bracketed form, `<local@domain>`.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for message headers.
    ///
    /// Names outside printable ASCII are RFC 2047 encoded; names with
    /// anything but letters, digits and spaces are quoted.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", encode_word(name), self.email)
            }
            Some(name) => {
                if name.contains(|c: char| !c.is_ascii_alphanumeric() && c != ' ') {
                    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                    format!("\"{}\" <{}>", escaped, self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        resolver::resolve_one(s)
    }
}

impl TryFrom<String> for Address {
    type Error = SmtpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        resolver::resolve_one(&s)
    }
}

/// Extra header as classified during composition.
///
/// `Reply-To` is the only header promoted into a structured field; every
/// other header travels as opaque text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraHeader {
    /// Reply-To values, still unparsed.
    ReplyTo(Vec<String>),
    /// Any other header, passed through verbatim.
    Opaque {
        /// Canonical header name.
        name: String,
        /// Header values in caller order.
        values: Vec<String>,
    },
}

impl ExtraHeader {
    /// Classifies a header by its canonical name.
    pub fn classify(name: &str, values: Vec<String>) -> Self {
        let name = canonical_header_name(name);
        if name == "Reply-To" {
            ExtraHeader::ReplyTo(values)
        } else {
            ExtraHeader::Opaque { name, values }
        }
    }
}

/// Canonicalizes a header name: first letter and every letter after a
/// hyphen upper case, the rest lower case (`x-mailer` becomes `X-Mailer`).
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.trim().chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// A composed message, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender address.
    pub from: Address,
    /// Recipients, in caller order.
    pub to: Vec<Address>,
    /// Reply-To addresses; empty when not supplied.
    pub reply_to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Body with CRLF line terminators.
    pub body: String,
    /// Pass-through headers keyed by canonical name, sorted by name.
    pub extra_headers: Vec<(String, Vec<String>)>,
}

impl Message {
    /// Returns the envelope derived from the From and To fields.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            sender: self.from.email.clone(),
            recipients: self.to.iter().map(|a| a.email.clone()).collect(),
        }
    }

    /// Returns the values of a pass-through header, if present.
    pub fn extra_header(&self, name: &str) -> Option<&[String]> {
        let name = canonical_header_name(name);
        self.extra_headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, values)| values.as_slice())
    }
}

/// SMTP envelope: address-only sender and recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// MAIL FROM address.
    pub sender: String,
    /// RCPT TO addresses.
    pub recipients: Vec<String>,
}

/// A message serialized for the DATA phase.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// Header block, blank line and body.
    pub raw: Vec<u8>,
    /// Envelope for the transport.
    pub envelope: Envelope,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Message-ID of the delivered message.
    pub message_id: String,
    /// Envelope the transport was given.
    pub envelope: Envelope,
    /// Time spent composing, rendering and delivering.
    pub duration: Duration,
}
