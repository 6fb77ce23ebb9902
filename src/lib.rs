//! # SMTP Notification Service
//!
//! Composes plain-text RFC 5322 messages and delivers them over SMTP:
//! - Ad-hoc email to caller-supplied recipients, with optional extra headers
//! - Notifications to a configured operator list, skipped when the list is empty
//! - Address parsing with display names and a configurable fallback sender
//! - One SMTP session per send with STARTTLS or implicit TLS and PLAIN/LOGIN auth
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_smtp_notify::{Service, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .default_from("\"Alerts\" <alerts@example.com>")
//!         .notify_addresses(["ops@example.com"])
//!         .build()?;
//!
//!     let service = Service::new(config)?;
//!
//!     service
//!         .send_email("", &["user@example.com"], "Welcome", "Hello!")
//!         .await?;
//!
//!     if let Some(result) = service.notify("Disk almost full", "sda1 at 97%").await? {
//!         println!("Notification sent with ID: {}", result.message_id);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Composition
pub mod compose;
pub mod resolver;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Observability
pub mod observability;

// Service
pub mod notify;
pub mod service;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthMethod, Credentials};
pub use compose::{compose, normalize_body, render};
pub use config::{ServiceConfig, ServiceConfigBuilder, TlsMode};
pub use errors::{ErrorCategory, SmtpError, SmtpErrorKind, SmtpResult};
pub use observability::{MetricsSnapshot, ServiceMetrics};
pub use protocol::{Command, Extensions, Reply};
pub use resolver::{resolve_many, resolve_one, resolve_optional};
pub use service::Service;
pub use transport::{SmtpTransport, Transport};
pub use types::{Address, Envelope, HeaderMap, Message, RenderedMessage, SendResult};
