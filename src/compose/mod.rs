//! Message composition and rendering.
//!
//! [`compose`] resolves addresses, promotes `Reply-To` out of the extra
//! headers and normalizes the body. [`render`] turns the result into an
//! RFC 5322 message plus the envelope the transport needs. Both are pure
//! functions; nothing here touches the network.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{SmtpError, SmtpResult};
use crate::resolver;
use crate::types::{Address, ExtraHeader, HeaderMap, Message, RenderedMessage};

/// Headers the renderer always writes itself.
const RESERVED_HEADERS: &[&str] = &[
    "Date",
    "From",
    "To",
    "Subject",
    "Mime-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
];

/// Longest header line before folding.
const MAX_LINE_LEN: usize = 78;

/// Raw bytes per RFC 2047 encoded word (keeps each word within 75 chars).
const ENCODED_WORD_CHUNK: usize = 45;

/// Composes a message.
///
/// `from` may be empty or unparseable, in which case `default_from` is used.
/// `to` must resolve to at least one address. A `Reply-To` entry in
/// `extra_headers` is resolved into [`Message::reply_to`]; every other entry
/// is carried through under its canonical name.
pub fn compose<S: AsRef<str>>(
    from: &str,
    to: &[S],
    subject: &str,
    body: &str,
    extra_headers: &HeaderMap,
    default_from: &str,
) -> SmtpResult<Message> {
    let from = resolve_sender(from, default_from)?;

    let to = resolver::resolve_many(to)?;
    if to.is_empty() {
        return Err(SmtpError::no_recipients());
    }

    let mut entries: Vec<_> = extra_headers.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut reply_to_values = Vec::new();
    let mut passthrough: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, values) in entries {
        match ExtraHeader::classify(name, values.clone()) {
            ExtraHeader::ReplyTo(values) => reply_to_values.extend(values),
            ExtraHeader::Opaque { name, values } => {
                if RESERVED_HEADERS.contains(&name.as_str()) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(header = %name, "Dropping extra header that shadows a fixed field");
                    continue;
                }
                validate_header_name(&name)?;
                for value in &values {
                    validate_header_value(&name, value)?;
                }
                if !values.is_empty() {
                    passthrough.entry(name).or_default().extend(values);
                }
            }
        }
    }

    let reply_to = resolver::resolve_many(&reply_to_values)?;

    Ok(Message {
        from,
        to,
        reply_to,
        subject: subject.to_string(),
        body: normalize_body(body),
        extra_headers: passthrough.into_iter().collect(),
    })
}

/// Renders a composed message.
///
/// The header block is written in a fixed order (Date, From, To, Reply-To,
/// Subject, Message-ID, MIME headers, then extra headers by name), followed
/// by a blank line and the body.
pub fn render(message: &Message) -> SmtpResult<RenderedMessage> {
    render_at(message, Utc::now())
}

fn render_at(message: &Message, date: DateTime<Utc>) -> SmtpResult<RenderedMessage> {
    let mut output = Vec::with_capacity(512 + message.body.len());

    let supplied_id = message
        .extra_header("Message-Id")
        .and_then(|values| values.first())
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string());
    let message_id = match &supplied_id {
        Some(id) => id.clone(),
        None => generate_message_id(&message.from, &date),
    };

    write_header(&mut output, "Date", &date.format("%a, %d %b %Y %H:%M:%S %z").to_string())?;
    write_header(&mut output, "From", &message.from.to_header())?;
    write_header(&mut output, "To", &join_addresses(&message.to))?;
    if !message.reply_to.is_empty() {
        write_header(&mut output, "Reply-To", &join_addresses(&message.reply_to))?;
    }
    write_header(&mut output, "Subject", &encode_header(&message.subject))?;
    if supplied_id.is_none() {
        write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
    }
    write_header(&mut output, "MIME-Version", "1.0")?;
    write_header(&mut output, "Content-Type", "text/plain; charset=utf-8")?;
    let transfer_encoding = if message.body.is_ascii() { "7bit" } else { "8bit" };
    write_header(&mut output, "Content-Transfer-Encoding", transfer_encoding)?;

    for (name, values) in &message.extra_headers {
        for value in values {
            write_header(&mut output, name, &encode_header(value))?;
        }
    }

    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(message.body.as_bytes());

    Ok(RenderedMessage {
        message_id,
        raw: output,
        envelope: message.envelope(),
    })
}

/// Resolves the sender, falling back to the configured default.
fn resolve_sender(from: &str, default_from: &str) -> SmtpResult<Address> {
    match resolver::resolve_optional(from) {
        Ok(Some(address)) => return Ok(address),
        Ok(None) => {}
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(from = %from, error = %_e, "Unparseable sender, using default");
        }
    }

    resolver::resolve_one(default_from).map_err(|e| {
        SmtpError::invalid_address(format!(
            "No usable sender and default sender is invalid: {}",
            e.message()
        ))
    })
}

/// Converts every line ending to CRLF and terminates a non-empty body with
/// exactly one CRLF.
pub fn normalize_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 32 + 2);
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }

    if !out.is_empty() && !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }
    out
}

fn join_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::to_header)
        .collect::<Vec<_>>()
        .join(", ")
}

fn generate_message_id(from: &Address, date: &DateTime<Utc>) -> String {
    let domain = from.email.rsplit('@').next().unwrap_or("localhost");
    format!("{}.{}@{}", Uuid::new_v4().simple(), date.timestamp(), domain)
}

fn validate_header_name(name: &str) -> SmtpResult<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| !c.is_ascii() || c.is_ascii_control() || c == ':' || c == ' ')
    {
        return Err(SmtpError::invalid_header(format!("Invalid header name: {:?}", name)));
    }
    Ok(())
}

fn validate_header_value(name: &str, value: &str) -> SmtpResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(SmtpError::invalid_header(format!(
            "Header {} contains a line break",
            name
        )));
    }
    Ok(())
}

/// Writes one header line, folded at 78 characters.
fn write_header(output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
    validate_header_name(name)?;
    validate_header_value(name, value)?;

    let header = format!("{}: {}", name, value);
    output.extend_from_slice(fold_header(&header).as_bytes());
    output.extend_from_slice(b"\r\n");
    Ok(())
}

/// Folds before a whitespace run that precedes a word, so removing the
/// inserted CRLFs restores the header exactly. Trailing whitespace never
/// starts a continuation line.
fn fold_header(header: &str) -> String {
    if header.len() <= MAX_LINE_LEN {
        return header.to_string();
    }

    let mut folded = String::with_capacity(header.len() + 16);
    let mut line_len = 0;
    let mut rest = header;

    while !rest.is_empty() {
        let ws = rest.len() - rest.trim_start_matches(' ').len();
        let end = rest[ws..].find(' ').map_or(rest.len(), |i| ws + i);
        let chunk = &rest[..end];

        if line_len > 0 && ws > 0 && end > ws && line_len + chunk.len() > MAX_LINE_LEN {
            folded.push_str("\r\n");
            line_len = 0;
        }
        folded.push_str(chunk);
        line_len += chunk.len();
        rest = &rest[end..];
    }

    folded
}

/// Encodes a header value with RFC 2047 when it is not plain ASCII.
fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }
    encode_word(value)
}

/// Encodes text as one or more RFC 2047 `B` encoded words.
///
/// Chunks never split a UTF-8 sequence, so every word decodes on its own.
pub(crate) fn encode_word(text: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + ENCODED_WORD_CHUNK).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&text.as_bytes()[start..end])));
        start = end;
    }

    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmtpErrorKind;
    use chrono::TimeZone;

    fn headers(pairs: &[(&str, &[&str])]) -> HeaderMap {
        pairs
            .iter()
            .map(|(name, values)| {
                (name.to_string(), values.iter().map(|v| v.to_string()).collect())
            })
            .collect()
    }

    fn rendered_text(message: &Message) -> String {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let rendered = render_at(message, date).unwrap();
        String::from_utf8(rendered.raw).unwrap()
    }

    #[test]
    fn test_compose_keeps_valid_sender() {
        let message = compose(
            "\"Gopher\" <gopher@x.org>",
            &["a@x.org", "b@x.org"],
            "s",
            "b",
            &HeaderMap::new(),
            "noreply@x.org",
        )
        .unwrap();

        assert_eq!(message.from.name.as_deref(), Some("Gopher"));
        assert_eq!(message.from.email, "gopher@x.org");
        assert_eq!(message.to.len(), 2);
        assert_eq!(message.subject, "s");
        assert_eq!(message.body, "b\r\n");
        assert!(message.reply_to.is_empty());
    }

    #[test]
    fn test_compose_falls_back_to_default_sender() {
        let empty = compose("", &["a@x.org"], "s", "b", &HeaderMap::new(), "noreply@x.org").unwrap();
        assert_eq!(empty.from.email, "noreply@x.org");
        assert!(empty.from.name.is_none());

        let garbage = compose("not valid", &["a@x.org"], "s", "b", &HeaderMap::new(), "noreply@x.org")
            .unwrap();
        assert_eq!(garbage.from.email, "noreply@x.org");
    }

    #[test]
    fn test_compose_keeps_valid_rfc5322_senders() {
        let cases = [
            ("gopher@x.org (Gopher)", Some("Gopher"), "gopher@x.org"),
            ("\"john doe\"@x.org", None, "\"john doe\"@x.org"),
            ("Gopher <gopher@x.org> (ops)", Some("Gopher"), "gopher@x.org"),
        ];
        for (from, name, email) in cases {
            let message = compose(from, &["a@x.org"], "s", "b", &HeaderMap::new(), "noreply@x.org").unwrap();
            assert_eq!(message.from.name.as_deref(), name, "{from}");
            assert_eq!(message.from.email, email, "{from}");
        }
    }

    #[test]
    fn test_compose_sender_with_line_break_uses_default() {
        let message = compose(
            "Evil\r\nBcc: victim@y.org <a@x.org>",
            &["a@x.org"],
            "s",
            "b",
            &HeaderMap::new(),
            "noreply@x.org",
        )
        .unwrap();
        assert_eq!(message.from.email, "noreply@x.org");
        assert!(message.from.name.is_none());
        assert!(!rendered_text(&message).contains("Bcc"));
    }

    #[test]
    fn test_compose_without_any_sender_fails() {
        let err = compose("", &["a@x.org"], "s", "b", &HeaderMap::new(), "").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidAddress);
    }

    #[test]
    fn test_compose_requires_recipients() {
        let err = compose::<&str>("me@x.org", &[], "s", "b", &HeaderMap::new(), "").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::NoRecipients);
    }

    #[test]
    fn test_compose_rejects_invalid_recipient() {
        let err = compose("me@x.org", &["a@x.org", "broken"], "s", "b", &HeaderMap::new(), "")
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidAddress);
    }

    #[test]
    fn test_compose_promotes_reply_to() {
        let extra = headers(&[
            ("reply-to", &["\"Ops\" <ops@x.org>", "archive@x.org"]),
            ("X-Mailer", &["notifier"]),
        ]);
        let message = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap();

        assert_eq!(message.reply_to.len(), 2);
        assert_eq!(message.reply_to[0].name.as_deref(), Some("Ops"));
        assert_eq!(message.reply_to[1].email, "archive@x.org");
        assert_eq!(message.extra_headers, vec![("X-Mailer".to_string(), vec!["notifier".to_string()])]);
        assert!(message.extra_header("Reply-To").is_none());
    }

    #[test]
    fn test_compose_rejects_invalid_reply_to() {
        let extra = headers(&[("Reply-To", &["nope"])]);
        let err = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidAddress);
    }

    #[test]
    fn test_compose_merges_header_casings() {
        let extra = headers(&[("X-Tag", &["one"]), ("x-tag", &["two"])]);
        let message = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap();
        assert_eq!(message.extra_header("x-tag").unwrap(), ["one", "two"]);
    }

    #[test]
    fn test_compose_drops_fixed_field_collisions() {
        let extra = headers(&[("subject", &["override"]), ("From", &["evil@x.org"])]);
        let message = compose("me@x.org", &["a@x.org"], "real", "b", &extra, "").unwrap();
        assert!(message.extra_headers.is_empty());
        assert_eq!(message.subject, "real");
    }

    #[test]
    fn test_compose_rejects_header_injection() {
        let extra = headers(&[("X-Note", &["fine\r\nBcc: victim@x.org"])]);
        let err = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);

        let extra = headers(&[("Bad Name", &["v"])]);
        let err = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);
    }

    #[test]
    fn test_normalize_body() {
        assert_eq!(normalize_body("b"), "b\r\n");
        assert_eq!(normalize_body("b\n"), "b\r\n");
        assert_eq!(normalize_body("b\r\n"), "b\r\n");
        assert_eq!(normalize_body("one\ntwo\rthree\r\nfour"), "one\r\ntwo\r\nthree\r\nfour\r\n");
        assert_eq!(normalize_body("trailing\n\n"), "trailing\r\n\r\n");
        assert_eq!(normalize_body(""), "");
    }

    #[test]
    fn test_render_header_order_and_body() {
        let extra = headers(&[("Reply-To", &["ops@x.org"]), ("X-Mailer", &["notifier"])]);
        let message = compose(
            "\"Gopher\" <gopher@x.org>",
            &["a@x.org", "B <b@x.org>"],
            "s",
            "b",
            &extra,
            "",
        )
        .unwrap();
        let text = rendered_text(&message);

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let names: Vec<&str> = head
            .split("\r\n")
            .map(|line| line.split_once(": ").unwrap().0)
            .collect();
        assert_eq!(
            names,
            [
                "Date",
                "From",
                "To",
                "Reply-To",
                "Subject",
                "Message-ID",
                "MIME-Version",
                "Content-Type",
                "Content-Transfer-Encoding",
                "X-Mailer",
            ]
        );
        assert!(head.starts_with("Date: Fri, 01 Mar 2024 12:30:00 +0000\r\n"));
        assert!(head.contains("From: Gopher <gopher@x.org>\r\n"));
        assert!(head.contains("To: a@x.org, B <b@x.org>\r\n"));
        assert!(head.contains("Subject: s\r\n"));
        assert!(head.contains("Content-Transfer-Encoding: 7bit"));
        assert_eq!(body, "b\r\n");
    }

    #[test]
    fn test_render_envelope_is_address_only() {
        let message = compose(
            "\"Gopher\" <gopher@x.org>",
            &["\"Support\" <support@x.org>", "contact@x.org"],
            "s",
            "b",
            &HeaderMap::new(),
            "",
        )
        .unwrap();
        let rendered = render(&message).unwrap();

        assert_eq!(rendered.envelope.sender, "gopher@x.org");
        assert_eq!(rendered.envelope.recipients, ["support@x.org", "contact@x.org"]);
        assert!(rendered.message_id.ends_with("@x.org"));
    }

    #[test]
    fn test_render_uses_supplied_message_id() {
        let extra = headers(&[("Message-ID", &["<fixed@x.org>"])]);
        let message = compose("me@x.org", &["a@x.org"], "s", "b", &extra, "").unwrap();
        let rendered = render(&message).unwrap();
        let text = String::from_utf8(rendered.raw).unwrap();

        assert_eq!(rendered.message_id, "fixed@x.org");
        assert_eq!(text.matches("Message-I").count(), 1);
    }

    #[test]
    fn test_render_encodes_non_ascii() {
        let message = compose("me@x.org", &["a@x.org"], "Grüße", "héllo", &HeaderMap::new(), "")
            .unwrap();
        let text = rendered_text(&message);

        assert!(text.contains("Subject: =?UTF-8?B?"));
        assert!(text.contains("Content-Transfer-Encoding: 8bit"));
        assert!(text.ends_with("\r\n\r\nhéllo\r\n"));
    }

    #[test]
    fn test_fold_header() {
        let long = format!("Subject: {}", "word ".repeat(30).trim_end());
        let folded = fold_header(&long);
        assert!(folded.contains("\r\n "));
        assert!(folded.split("\r\n").all(|line| line.len() <= MAX_LINE_LEN));
        assert_eq!(folded.replace("\r\n", ""), long);
    }

    #[test]
    fn test_fold_header_keeps_space_runs() {
        let long = format!("X-Note: {}   ", "ab   cd".repeat(20));
        let folded = fold_header(&long);

        assert!(folded.contains("\r\n"));
        assert_eq!(folded.replace("\r\n", ""), long);
        for line in folded.split("\r\n") {
            assert!(!line.trim().is_empty(), "whitespace-only line in {folded:?}");
        }
        assert!(folded.ends_with("cd   "));
    }

    #[test]
    fn test_encode_word_splits_on_char_boundaries() {
        let text = "ü".repeat(40);
        let encoded = encode_word(&text);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        for word in words {
            assert!(word.len() <= 75);
            let payload = word.trim_start_matches("=?UTF-8?B?").trim_end_matches("?=");
            let decoded = BASE64.decode(payload).unwrap();
            assert!(String::from_utf8(decoded).is_ok());
        }
    }
}
