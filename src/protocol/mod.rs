//! The RFC 5321 dialog the transport drives.
//!
//! [`Command`] renders client lines, [`ReplyLine`] and [`Reply`] read
//! server answers one line at a time, [`Extensions`] records what EHLO
//! advertised, and [`dot_stuff`] frames the DATA payload.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// Reply codes the session checks for.
pub mod codes {
    /// `220` greeting.
    pub const READY: u16 = 220;
    /// `235` after a successful AUTH.
    pub const AUTH_OK: u16 = 235;
    /// `334` AUTH challenge.
    pub const AUTH_CHALLENGE: u16 = 334;
    /// `354` after DATA.
    pub const SEND_DATA: u16 = 354;
    /// `421` the server is closing the channel.
    pub const CLOSING: u16 = 421;
}

/// A client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `EHLO <client id>`.
    Ehlo(String),
    /// `HELO <client id>`, for servers that reject EHLO.
    Helo(String),
    /// `STARTTLS`.
    StartTls,
    /// `AUTH <mechanism> [initial response]`.
    Auth(AuthMethod, Option<String>),
    /// `MAIL FROM:<sender>`, with `BODY=8BITMIME` when the body needs it.
    Mail {
        /// Bare sender address.
        sender: String,
        /// Whether to declare an 8-bit body.
        eight_bit: bool,
    },
    /// `RCPT TO:<recipient>`.
    Rcpt(String),
    /// `DATA`.
    Data,
    /// `QUIT`.
    Quit,
}

impl Command {
    /// Returns the line to write, without the trailing CRLF.
    pub fn wire(&self) -> String {
        match self {
            Command::Ehlo(client_id) => format!("EHLO {}", client_id),
            Command::Helo(client_id) => format!("HELO {}", client_id),
            Command::StartTls => String::from("STARTTLS"),
            Command::Auth(method, None) => format!("AUTH {}", method),
            Command::Auth(method, Some(initial)) => format!("AUTH {} {}", method, initial),
            Command::Mail { sender, eight_bit } => {
                let param = if *eight_bit { " BODY=8BITMIME" } else { "" };
                format!("MAIL FROM:<{}>{}", sender, param)
            }
            Command::Rcpt(recipient) => format!("RCPT TO:<{}>", recipient),
            Command::Data => String::from("DATA"),
            Command::Quit => String::from("QUIT"),
        }
    }
}

/// Writes the command for logs; AUTH payloads are left out.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Command::Auth(method, _) = self {
            return write!(f, "AUTH {}", method);
        }
        f.write_str(&self.wire())
    }
}

/// One line of a server reply: `ddd-text` or `ddd text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// Three-digit reply code.
    pub code: u16,
    /// False when a `-` says more lines follow.
    pub last: bool,
    /// Text after the separator.
    pub text: String,
}

impl ReplyLine {
    /// Parses a line with its line ending already stripped.
    pub fn parse(line: &str) -> SmtpResult<Self> {
        let invalid = || SmtpError::protocol(format!("Malformed reply line: {:?}", line));

        let digits = line.get(..3).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
        let code = digits.and_then(|d| d.parse().ok()).ok_or_else(invalid)?;

        let (last, text) = match line.as_bytes().get(3) {
            None => (true, ""),
            Some(b' ') => (true, &line[4..]),
            Some(b'-') => (false, &line[4..]),
            Some(_) => return Err(invalid()),
        };

        Ok(Self {
            code,
            last,
            text: text.to_string(),
        })
    }
}

/// A complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code shared by every line.
    pub code: u16,
    /// RFC 3463 status taken from the front of the first line.
    pub enhanced: Option<EnhancedStatusCode>,
    /// Text of each line, the enhanced status removed.
    pub lines: Vec<String>,
}

impl Reply {
    /// Assembles a reply from its lines; the last one must close it.
    pub fn from_lines(lines: Vec<ReplyLine>) -> SmtpResult<Self> {
        let code = match lines.first() {
            Some(first) => first.code,
            None => return Err(SmtpError::protocol("Empty reply")),
        };
        if lines.iter().any(|l| l.code != code) {
            return Err(SmtpError::protocol("Reply lines disagree on the reply code"));
        }
        if lines.iter().position(|l| l.last) != Some(lines.len() - 1) {
            return Err(SmtpError::protocol("Reply is not terminated by its last line"));
        }

        let mut texts: Vec<String> = lines.into_iter().map(|l| l.text).collect();
        let enhanced = match texts[0].split_once(' ') {
            Some((status, rest)) => EnhancedStatusCode::parse(status).map(|s| (s, rest.to_string())),
            None => EnhancedStatusCode::parse(&texts[0]).map(|s| (s, String::new())),
        };
        let enhanced = enhanced.map(|(status, rest)| {
            texts[0] = rest;
            status
        });

        Ok(Self {
            code,
            enhanced,
            lines: texts,
        })
    }

    /// 2xx.
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Text of the first line.
    pub fn text(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    /// All lines joined with spaces, for error messages.
    pub fn joined(&self) -> String {
        self.lines.join(" ")
    }

    /// Converts a refusal into an error, keeping both status codes.
    pub fn to_error(&self) -> SmtpError {
        let err = SmtpError::from_smtp_response(self.code, self.joined());
        match &self.enhanced {
            Some(status) => err.with_enhanced_code(status.clone()),
            None => err,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// Service extensions a server advertised in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    /// `SIZE` limit in bytes, if one was given.
    pub max_size: Option<usize>,
    /// `AUTH` mechanisms we can use; `None` when AUTH was not advertised.
    pub auth: Option<HashSet<AuthMethod>>,
    /// `STARTTLS`.
    pub starttls: bool,
    /// `8BITMIME`.
    pub eight_bit_mime: bool,
}

impl Extensions {
    /// Reads the keyword lines of an EHLO reply. The first line is the
    /// server's greeting and is skipped.
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut extensions = Self::default();

        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };

            if keyword.eq_ignore_ascii_case("SIZE") {
                extensions.max_size = words.next().and_then(|n| n.parse().ok());
            } else if keyword.eq_ignore_ascii_case("AUTH") {
                extensions
                    .auth
                    .get_or_insert_with(HashSet::new)
                    .extend(words.filter_map(AuthMethod::from_keyword));
            } else if keyword.eq_ignore_ascii_case("STARTTLS") {
                extensions.starttls = true;
            } else if keyword.eq_ignore_ascii_case("8BITMIME") {
                extensions.eight_bit_mime = true;
            }
        }

        extensions
    }
}

/// Frames a rendered message for DATA.
///
/// Doubles a leading `.` on every line, ends the content with CRLF and
/// appends the `.` terminator line.
pub fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(message.len() + 8);

    for line in message.split_inclusive(|&b| b == b'\n') {
        if line.first() == Some(&b'.') {
            framed.push(b'.');
        }
        framed.extend_from_slice(line);
    }

    match framed.last() {
        Some(b'\n') if framed.ends_with(b"\r\n") => {}
        Some(b'\n') => {
            framed.pop();
            framed.extend_from_slice(b"\r\n");
        }
        Some(_) => framed.extend_from_slice(b"\r\n"),
        None => {}
    }

    framed.extend_from_slice(b".\r\n");
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(lines: &[&str]) -> SmtpResult<Reply> {
        let lines = lines
            .iter()
            .map(|l| ReplyLine::parse(l))
            .collect::<SmtpResult<Vec<_>>>()?;
        Reply::from_lines(lines)
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(Command::Ehlo("relay.internal".into()).wire(), "EHLO relay.internal");
        assert_eq!(Command::Rcpt("ops@x.org".into()).wire(), "RCPT TO:<ops@x.org>");
        assert_eq!(
            Command::Mail {
                sender: "noreply@x.org".into(),
                eight_bit: false,
            }
            .wire(),
            "MAIL FROM:<noreply@x.org>"
        );
        assert_eq!(
            Command::Mail {
                sender: "noreply@x.org".into(),
                eight_bit: true,
            }
            .wire(),
            "MAIL FROM:<noreply@x.org> BODY=8BITMIME"
        );
    }

    #[test]
    fn test_auth_is_redacted_in_logs() {
        let cmd = Command::Auth(AuthMethod::Plain, Some("AGpvZQBzZWNyZXQ=".into()));
        assert_eq!(cmd.wire(), "AUTH PLAIN AGpvZQBzZWNyZXQ=");
        assert_eq!(cmd.to_string(), "AUTH PLAIN");
        assert_eq!(Command::Auth(AuthMethod::Login, None).to_string(), "AUTH LOGIN");
    }

    #[test]
    fn test_reply_line_parse() {
        assert_eq!(
            ReplyLine::parse("250-PIPELINING").unwrap(),
            ReplyLine {
                code: 250,
                last: false,
                text: "PIPELINING".into(),
            }
        );
        let bare = ReplyLine::parse("354").unwrap();
        assert!(bare.last);
        assert_eq!(bare.text, "");

        assert!(ReplyLine::parse("OK").is_err());
        assert!(ReplyLine::parse("25x ok").is_err());
        assert!(ReplyLine::parse("250_ok").is_err());
    }

    #[test]
    fn test_multiline_reply() {
        let r = reply(&["250-mx.x.org greets relay", "250-SIZE 1000", "250 8BITMIME"]).unwrap();
        assert_eq!(r.code, 250);
        assert!(r.is_positive());
        assert_eq!(r.text(), "mx.x.org greets relay");
        assert_eq!(r.lines.len(), 3);

        assert!(reply(&[]).is_err());
        assert!(reply(&["250-a", "251 b"]).is_err());
        assert!(reply(&["250-a"]).is_err());
        assert!(reply(&["250 a", "250 b"]).is_err());
    }

    #[test]
    fn test_reply_enhanced_status() {
        let r = reply(&["550 5.1.1 Mailbox unavailable"]).unwrap();
        assert_eq!(r.text(), "Mailbox unavailable");
        let status = r.enhanced.clone().unwrap();
        assert_eq!((status.class, status.subject, status.detail), (5, 1, 1));

        let err = r.to_error();
        assert_eq!(err.smtp_code(), Some(550));
        assert_eq!(err.enhanced_code(), Some(&status));

        let r = reply(&["250 2.0.0"]).unwrap();
        assert!(r.enhanced.is_some());
        assert_eq!(r.text(), "");

        let r = reply(&["220 mx.x.org ESMTP"]).unwrap();
        assert!(r.enhanced.is_none());
        assert_eq!(r.to_string(), "220 mx.x.org ESMTP");
    }

    #[test]
    fn test_extensions_from_ehlo() {
        let r = reply(&[
            "250-mx.x.org",
            "250-size 52428800",
            "250-AUTH LOGIN XOAUTH2 PLAIN",
            "250-STARTTLS",
            "250 8BITMIME",
        ])
        .unwrap();

        let ext = Extensions::from_ehlo(&r);
        assert_eq!(ext.max_size, Some(52_428_800));
        assert_eq!(
            ext.auth,
            Some(HashSet::from([AuthMethod::Plain, AuthMethod::Login]))
        );
        assert!(ext.starttls);
        assert!(ext.eight_bit_mime);
    }

    #[test]
    fn test_extensions_auth_without_usable_mechanism() {
        let r = reply(&["250-mx.x.org", "250 AUTH CRAM-MD5"]).unwrap();
        assert_eq!(Extensions::from_ehlo(&r).auth, Some(HashSet::new()));

        let r = reply(&["250 STARTTLS"]).unwrap();
        assert_eq!(Extensions::from_ehlo(&r), Extensions::default());
    }

    #[test]
    fn test_dot_stuff() {
        let framed = dot_stuff(b"Subject: x\r\n\r\n.\r\n..two\r\nend");
        assert_eq!(framed, b"Subject: x\r\n\r\n..\r\n...two\r\nend\r\n.\r\n");

        assert_eq!(dot_stuff(b"bare lf\n"), b"bare lf\r\n.\r\n");
        assert_eq!(dot_stuff(b"done\r\n"), b"done\r\n.\r\n");
        assert_eq!(dot_stuff(b""), b".\r\n");
    }
}
