//! Configuration for the notification service.
//!
//! Provides the service configuration with a builder for:
//! - SMTP endpoint and TLS policy
//! - Sender identity and operator list
//! - Optional authentication credentials
//!
//! Configuration can also be loaded from JSON.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use crate::auth::Credentials;
use crate::errors::{SmtpError, SmtpResult};
use crate::resolver;

/// Submission port, used when `smtp_port` is absent.
pub const DEFAULT_PORT: u16 = 587;

/// Default client identity sent with EHLO.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// How the transport secures the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain TCP only. Credentials are then refused for remote relays.
    None,
    /// Upgrade when the relay offers STARTTLS, otherwise stay in plain text.
    #[default]
    StartTls,
    /// Fail the send when the relay does not offer STARTTLS.
    StartTlsRequired,
    /// TLS from the first byte, as on port 465.
    Implicit,
}

/// Service configuration.
///
/// Immutable once a service is built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    /// Skip certificate verification. Encryption is still negotiated.
    #[serde(default)]
    pub smtp_skip_verify: bool,
    /// Sender used when a call supplies none; may be empty.
    #[serde(default)]
    pub default_from: String,
    /// Operator list for notifications; empty disables them.
    #[serde(default)]
    pub notify_addresses: Vec<String>,
    /// TLS mode.
    #[serde(default)]
    pub tls_mode: TlsMode,
    /// Name announced in EHLO/HELO; `localhost` when unset.
    pub client_id: Option<String>,
    /// Relay login name; set together with `password`.
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    /// PLAIN authorization identity.
    pub identity: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ServiceConfig {
    /// Starts a builder with every field at its default.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> SmtpResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            SmtpError::configuration(format!("Invalid configuration JSON: {}", e)).with_cause(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> SmtpResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SmtpError::configuration(format!("Cannot read {}: {}", path.display(), e)).with_cause(e)
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the configuration before a service is built from it.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.smtp_host.trim().is_empty() {
            return Err(SmtpError::configuration("Host is required"));
        }

        if self.smtp_port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }

        resolver::resolve_optional(&self.default_from).map_err(|e| {
            SmtpError::configuration(format!("default_from: {}", e.message()))
        })?;

        resolver::resolve_many(&self.notify_addresses).map_err(|e| {
            SmtpError::configuration(format!("notify_addresses: {}", e.message()))
        })?;

        if !self.notify_addresses.is_empty() && self.default_from.trim().is_empty() {
            return Err(SmtpError::configuration(
                "default_from is required when notify_addresses is set",
            ));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(SmtpError::configuration(
                "username and password must be set together",
            ));
        }

        if self.identity.is_some() && self.username.is_none() {
            return Err(SmtpError::configuration("identity requires credentials"));
        }

        if self.smtp_skip_verify {
            #[cfg(feature = "tracing")]
            tracing::warn!(host = %self.smtp_host, "Certificate verification is disabled");
        }

        Ok(())
    }

    /// Returns the `host:port` dial target.
    pub fn address(&self) -> String {
        format!("{}:{}", self.smtp_host, self.smtp_port)
    }

    /// Name to announce in EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID)
    }

    /// Returns the configured credentials, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.username.as_ref()?;
        let password = self.password.clone()?;
        let credentials = Credentials::new(username.clone(), password);
        Some(match &self.identity {
            Some(identity) => credentials.with_identity(identity.clone()),
            None => credentials,
        })
    }

    /// Returns true if the host is a loopback name or address.
    pub fn is_local_host(&self) -> bool {
        let host = self.smtp_host.trim_start_matches('[').trim_end_matches(']');
        host.eq_ignore_ascii_case("localhost")
            || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
    }
}

/// Builder for service configuration.
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    smtp_host: Option<String>,
    smtp_port: u16,
    smtp_skip_verify: bool,
    default_from: String,
    notify_addresses: Vec<String>,
    tls_mode: TlsMode,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
    identity: Option<String>,
}

impl ServiceConfigBuilder {
    /// Relay host name or IP address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.smtp_host = Some(host.into());
        self
    }

    /// Relay port.
    pub fn port(mut self, port: u16) -> Self {
        self.smtp_port = port;
        self
    }

    /// Disables certificate verification (testing only).
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.smtp_skip_verify = skip;
        self
    }

    /// Sets the fallback sender.
    pub fn default_from(mut self, from: impl Into<String>) -> Self {
        self.default_from = from.into();
        self
    }

    /// Sets the operator list used by notifications.
    pub fn notify_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notify_addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Shorthand for `tls_mode(TlsMode::None)`.
    pub fn no_tls(mut self) -> Self {
        self.tls_mode = TlsMode::None;
        self
    }

    /// Name to announce in EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the relay login.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the PLAIN authorization identity.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> SmtpResult<ServiceConfig> {
        let config = ServiceConfig {
            smtp_host: self
                .smtp_host
                .ok_or_else(|| SmtpError::configuration("Host is required"))?,
            smtp_port: if self.smtp_port == 0 { DEFAULT_PORT } else { self.smtp_port },
            smtp_skip_verify: self.smtp_skip_verify,
            default_from: self.default_from,
            notify_addresses: self.notify_addresses,
            tls_mode: self.tls_mode,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
            identity: self.identity,
        };

        config.validate()?;
        Ok(config)
    }
}
