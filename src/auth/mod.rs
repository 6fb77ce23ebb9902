//! SMTP AUTH for relays that require a login.
//!
//! PLAIN (RFC 4616) is used when offered, LOGIN otherwise. Both send the
//! password base64-encoded, so the transport only runs them over TLS or to
//! a loopback relay.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// AUTH mechanisms this crate speaks, ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Username and password in two challenge rounds.
    Login,
    /// Everything in the initial response.
    Plain,
}

impl AuthMethod {
    /// Keyword used in `AUTH` and in the EHLO reply.
    pub fn keyword(&self) -> &'static str {
        match self {
            AuthMethod::Login => "LOGIN",
            AuthMethod::Plain => "PLAIN",
        }
    }

    /// Matches an advertised mechanism, ignoring case. Mechanisms we do not
    /// implement give `None`.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        [AuthMethod::Plain, AuthMethod::Login]
            .into_iter()
            .find(|m| keyword.eq_ignore_ascii_case(m.keyword()))
    }

    /// Picks the preferred mechanism among those offered.
    pub fn preferred<'a, I>(offered: I) -> SmtpResult<Self>
    where
        I: IntoIterator<Item = &'a AuthMethod>,
    {
        offered.into_iter().max().copied().ok_or_else(|| {
            SmtpError::new(
                SmtpErrorKind::AuthNotSupported,
                "Server offers neither PLAIN nor LOGIN",
            )
        })
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Login for the relay.
#[derive(Clone)]
pub struct Credentials {
    /// PLAIN authorization identity, when acting for another user.
    pub identity: Option<String>,
    /// Authentication identity.
    pub username: String,
    /// Password.
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials without an authorization identity.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            identity: None,
            username: username.into(),
            password,
        }
    }

    /// Sets the authorization identity; an empty string clears it.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        self.identity = (!identity.is_empty()).then_some(identity);
        self
    }

    /// PLAIN initial response: base64 of `identity NUL username NUL password`.
    pub fn plain_response(&self) -> String {
        let mut raw = Vec::new();
        raw.extend_from_slice(self.identity.as_deref().unwrap_or_default().as_bytes());
        raw.push(0);
        raw.extend_from_slice(self.username.as_bytes());
        raw.push(0);
        raw.extend_from_slice(self.password.expose_secret().as_bytes());
        BASE64.encode(raw)
    }

    /// Answer to LOGIN's username challenge.
    pub fn login_username(&self) -> String {
        BASE64.encode(&self.username)
    }

    /// Answer to LOGIN's password challenge.
    pub fn login_password(&self) -> String {
        BASE64.encode(self.password.expose_secret())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_login() -> Credentials {
        Credentials::new("notifier", SecretString::new("hunter2".to_string()))
    }

    #[test]
    fn test_keyword_matching() {
        assert_eq!(AuthMethod::from_keyword("plain"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_keyword("LOGIN"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_keyword("XOAUTH2"), None);
        assert_eq!(AuthMethod::Plain.to_string(), "PLAIN");
    }

    #[test]
    fn test_preferred_mechanism() {
        let both = [AuthMethod::Login, AuthMethod::Plain];
        assert_eq!(AuthMethod::preferred(&both).unwrap(), AuthMethod::Plain);
        assert_eq!(AuthMethod::preferred(&[AuthMethod::Login]).unwrap(), AuthMethod::Login);
        assert_eq!(
            AuthMethod::preferred(&[]).unwrap_err().kind(),
            SmtpErrorKind::AuthNotSupported
        );
    }

    #[test]
    fn test_plain_response() {
        let decoded = BASE64.decode(relay_login().plain_response()).unwrap();
        assert_eq!(decoded, b"\0notifier\0hunter2");

        let decoded = BASE64
            .decode(relay_login().with_identity("ops").plain_response())
            .unwrap();
        assert_eq!(decoded, b"ops\0notifier\0hunter2");

        assert!(relay_login().with_identity("").identity.is_none());
    }

    #[test]
    fn test_login_responses() {
        let creds = relay_login();
        assert_eq!(creds.login_username(), "bm90aWZpZXI=");
        assert_eq!(creds.login_password(), "aHVudGVyMg==");
    }

    #[test]
    fn test_debug_hides_password() {
        let shown = format!("{:?}", relay_login());
        assert!(shown.contains("notifier"));
        assert!(!shown.contains("hunter2"));
    }
}
