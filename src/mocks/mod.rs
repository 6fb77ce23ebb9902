//! Test transports.
//!
//! [`RecordingTransport`] keeps the last delivery in a single
//! mutex-protected slot; [`FailingTransport`] fails every send.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::transport::Transport;
use crate::types::Envelope;

/// A message handed to a test transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Envelope passed to the transport.
    pub envelope: Envelope,
    /// Raw message bytes.
    pub raw: Vec<u8>,
}

impl Delivery {
    /// Returns the raw message as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Returns the first value of a header, unfolded, matching the name
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Returns all headers in order, with folded lines joined.
    pub fn headers(&self) -> Vec<(String, String)> {
        let text = self.text();
        let head = text.split_once("\r\n\r\n").map(|(head, _)| head).unwrap_or(text.as_str());

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.split("\r\n") {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push_str(line);
                }
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.to_string(), value.trim_start().to_string()));
            }
        }
        headers
    }

    /// Returns the body after the blank line.
    pub fn body(&self) -> String {
        let text = self.text();
        text.split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default()
    }
}

/// Transport that records the last delivery and counts calls.
///
/// Clones share state, so a test can keep one handle while the service
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    last: Arc<Mutex<Option<Delivery>>>,
    calls: Arc<AtomicUsize>,
}

impl RecordingTransport {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recent delivery.
    pub fn last(&self) -> Option<Delivery> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many times `send` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clears the recorded delivery and call count.
    pub fn clear(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: &Envelope, message: &[u8]) -> SmtpResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Delivery {
            envelope: envelope.clone(),
            raw: message.to_vec(),
        });
        Ok(())
    }
}

/// Transport that fails every send with the given kind.
#[derive(Debug, Clone)]
pub struct FailingTransport {
    kind: SmtpErrorKind,
}

impl FailingTransport {
    /// Creates a transport failing with `kind`.
    pub fn new(kind: SmtpErrorKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _envelope: &Envelope, _message: &[u8]) -> SmtpResult<()> {
        Err(SmtpError::new(self.kind, "Simulated transport failure"))
    }
}

/// Envelope fixture.
pub fn test_envelope() -> Envelope {
    Envelope {
        sender: "sender@example.com".to_string(),
        recipients: vec!["recipient@example.com".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_transport_keeps_last() {
        let transport = RecordingTransport::new();
        let handle = transport.clone();

        transport.send(&test_envelope(), b"Subject: one\r\n\r\n1\r\n").await.unwrap();
        transport.send(&test_envelope(), b"Subject: two\r\n\r\n2\r\n").await.unwrap();

        assert_eq!(handle.calls(), 2);
        let last = handle.last().unwrap();
        assert_eq!(last.header("subject").as_deref(), Some("two"));
        assert_eq!(last.body(), "2\r\n");

        handle.clear();
        assert!(transport.last().is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_delivery_unfolds_headers() {
        let delivery = Delivery {
            envelope: test_envelope(),
            raw: b"Subject: a long\r\n subject line\r\nTo: x@example.com\r\n\r\nbody\r\n".to_vec(),
        };
        assert_eq!(delivery.header("Subject").as_deref(), Some("a long subject line"));
        assert_eq!(delivery.header("to").as_deref(), Some("x@example.com"));
        assert!(delivery.header("Cc").is_none());
    }

    #[test]
    fn test_failing_transport() {
        let transport = FailingTransport::new(SmtpErrorKind::ConnectionReset);
        let err = tokio_test::block_on(transport.send(&test_envelope(), b"")).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionReset);
    }
}
