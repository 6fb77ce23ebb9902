//! Error types for the notification service.
//!
//! Every failure surfaces as an [`SmtpError`]. Its [`SmtpErrorKind`] falls
//! into one of a few categories: address resolution, empty recipient sets,
//! header and configuration problems, and failures reported by the transport.

use std::fmt;
use thiserror::Error;

/// Result type for service operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Composition errors
    /// A mailbox string does not follow the address grammar.
    InvalidAddress,
    /// A direct send resolved to zero recipients.
    NoRecipients,
    /// A header name or value cannot be written to the message.
    InvalidHeader,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,

    // Transport errors
    /// Connection was refused or could not be established.
    ConnectionRefused,
    /// Connection was reset or closed by the server.
    ConnectionReset,
    /// Reading or writing the socket failed.
    Io,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS required but not offered.
    StarttlsNotSupported,
    /// Server rejected the credentials.
    AuthenticationFailed,
    /// Server offers no mechanism we can use.
    AuthNotSupported,
    /// Malformed or unexpected server reply.
    InvalidResponse,
    /// Server rejected MAIL FROM.
    SenderRejected,
    /// Server rejected a RCPT TO.
    RecipientRejected,
    /// Server refused the message content.
    MessageRejected,
    /// Server is shutting down (421).
    ServerShutdown,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

/// Broad grouping of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Address resolution failed.
    Address,
    /// Direct send without recipients.
    NoRecipients,
    /// Message could not be composed or rendered.
    Message,
    /// Service configuration is unusable.
    Configuration,
    /// The SMTP session failed.
    Transport,
}

impl SmtpErrorKind {
    /// Returns the category of this kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SmtpErrorKind::InvalidAddress => ErrorCategory::Address,
            SmtpErrorKind::NoRecipients => ErrorCategory::NoRecipients,
            SmtpErrorKind::InvalidHeader => ErrorCategory::Message,
            SmtpErrorKind::ConfigurationInvalid => ErrorCategory::Configuration,
            SmtpErrorKind::ConnectionRefused
            | SmtpErrorKind::ConnectionReset
            | SmtpErrorKind::Io
            | SmtpErrorKind::TlsHandshakeFailed
            | SmtpErrorKind::StarttlsNotSupported
            | SmtpErrorKind::AuthenticationFailed
            | SmtpErrorKind::AuthNotSupported
            | SmtpErrorKind::InvalidResponse
            | SmtpErrorKind::SenderRejected
            | SmtpErrorKind::RecipientRejected
            | SmtpErrorKind::MessageRejected
            | SmtpErrorKind::ServerShutdown
            | SmtpErrorKind::Unknown => ErrorCategory::Transport,
        }
    }

    /// Returns true if a caller could reasonably try this send again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::Io
                | SmtpErrorKind::ServerShutdown
        )
    }
}

impl SmtpErrorKind {
    fn label(&self) -> &'static str {
        match self {
            SmtpErrorKind::InvalidAddress => "Invalid address",
            SmtpErrorKind::NoRecipients => "No recipients",
            SmtpErrorKind::InvalidHeader => "Invalid header",
            SmtpErrorKind::ConfigurationInvalid => "Invalid configuration",
            SmtpErrorKind::ConnectionRefused => "Connection refused",
            SmtpErrorKind::ConnectionReset => "Connection lost",
            SmtpErrorKind::Io => "Socket error",
            SmtpErrorKind::TlsHandshakeFailed => "TLS failure",
            SmtpErrorKind::StarttlsNotSupported => "STARTTLS unavailable",
            SmtpErrorKind::AuthenticationFailed => "Authentication failed",
            SmtpErrorKind::AuthNotSupported => "No usable AUTH mechanism",
            SmtpErrorKind::InvalidResponse => "Protocol error",
            SmtpErrorKind::SenderRejected => "Sender rejected",
            SmtpErrorKind::RecipientRejected => "Recipient rejected",
            SmtpErrorKind::MessageRejected => "Message rejected",
            SmtpErrorKind::ServerShutdown => "Server closing",
            SmtpErrorKind::Unknown => "Unexpected failure",
        }
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// RFC 3463 status such as `5.1.1`, sent after the reply code by servers
/// that advertise ENHANCEDSTATUSCODES.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// 2, 4 or 5.
    pub class: u8,
    /// What the status is about, such as 1 for addressing.
    pub subject: u16,
    /// Detail within the subject.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses `class.subject.detail`; anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }

    /// Class 5.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Error returned by every fallible operation in this crate.
///
/// Carries the server's reply code and enhanced status when the failure
/// came from an SMTP reply.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates an error of `kind`.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Attaches the reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Attaches the enhanced status.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Attaches the error that caused this one.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// What went wrong.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Broad category of the kind.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the server produced one.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Enhanced status from the server reply.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if the transport reported this failure.
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Returns true if this error is worth retrying.
    ///
    /// The service never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return matches!(code, 421 | 450 | 451 | 452);
        }
        self.kind.is_retryable()
    }

    /// Mailbox string that does not parse.
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidAddress, message)
    }

    /// Direct send with nothing in `to`.
    pub fn no_recipients() -> Self {
        Self::new(SmtpErrorKind::NoRecipients, "At least one recipient is required")
    }

    /// Header that cannot be written safely.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidHeader, message)
    }

    /// Unusable configuration.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// TLS setup or handshake failure.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Malformed or unexpected server reply.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates an error from a negative SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            530 | 534 | 535 | 538 => SmtpErrorKind::AuthenticationFailed,
            500..=504 => SmtpErrorKind::InvalidResponse,
            _ if (400..600).contains(&code) => SmtpErrorKind::MessageRejected,
            _ => SmtpErrorKind::InvalidResponse,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_errors_are_not_transport_errors() {
        assert_eq!(SmtpError::invalid_address("x").category(), ErrorCategory::Address);
        assert_eq!(SmtpError::no_recipients().category(), ErrorCategory::NoRecipients);
        assert_eq!(SmtpError::invalid_header("x").category(), ErrorCategory::Message);
        assert!(!SmtpError::configuration("x").is_transport());
        assert!(SmtpError::tls("handshake").is_transport());
        assert!(SmtpError::new(SmtpErrorKind::RecipientRejected, "x").is_transport());
    }

    #[test]
    fn test_enhanced_status() {
        let status = EnhancedStatusCode::parse("4.7.0").unwrap();
        assert_eq!((status.class, status.subject, status.detail), (4, 7, 0));
        assert!(!status.is_permanent());
        assert_eq!(status.to_string(), "4.7.0");

        for bad in ["5.1", "5.1.1.1", "1.0.0", "relay.example.org", ""] {
            assert!(EnhancedStatusCode::parse(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_reply_codes_map_to_kinds() {
        let cases = [
            (421, SmtpErrorKind::ServerShutdown, true),
            (451, SmtpErrorKind::MessageRejected, true),
            (502, SmtpErrorKind::InvalidResponse, false),
            (535, SmtpErrorKind::AuthenticationFailed, false),
            (554, SmtpErrorKind::MessageRejected, false),
        ];
        for (code, kind, retryable) in cases {
            let err = SmtpError::from_smtp_response(code, "reply");
            assert_eq!(err.kind(), kind, "{code}");
            assert_eq!(err.smtp_code(), Some(code));
            assert_eq!(err.is_retryable(), retryable, "{code}");
        }
    }

    #[test]
    fn test_display_includes_codes() {
        let err = SmtpError::from_smtp_response(550, "mailbox unavailable")
            .with_enhanced_code(EnhancedStatusCode::parse("5.1.1").unwrap());
        assert_eq!(
            err.to_string(),
            "Message rejected: mailbox unavailable (SMTP 550) [5.1.1]"
        );
        assert_eq!(
            SmtpError::no_recipients().to_string(),
            "No recipients: At least one recipient is required"
        );
    }
}
