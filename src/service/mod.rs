//! The caller-facing notification service.
//!
//! A [`Service`] holds an immutable [`ServiceConfig`] and a [`Transport`].
//! Every send resolves addresses, composes and renders the message, and
//! hands it to the transport exactly once.

use std::fmt;
use std::sync::Arc;

use crate::compose;
use crate::config::ServiceConfig;
use crate::errors::SmtpResult;
use crate::observability::{ServiceMetrics, Timer};
use crate::transport::{SmtpTransport, Transport};
use crate::types::{HeaderMap, RenderedMessage, SendResult};

/// Notification service.
///
/// `Send + Sync` whenever the transport is; share it behind an `Arc` for
/// concurrent use.
pub struct Service<T: Transport = SmtpTransport> {
    config: Arc<ServiceConfig>,
    transport: T,
    metrics: Arc<ServiceMetrics>,
}

impl Service<SmtpTransport> {
    /// Creates a service that delivers over SMTP.
    pub fn new(config: ServiceConfig) -> SmtpResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(ServiceMetrics::new());
        let transport = SmtpTransport::new(Arc::clone(&config), Arc::clone(&metrics));

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %config.address(), tls_mode = ?config.tls_mode, "Notification service created");

        Ok(Self {
            config,
            transport,
            metrics,
        })
    }
}

impl<T: Transport> Service<T> {
    /// Creates a service with a custom transport.
    pub fn with_transport(config: ServiceConfig, transport: T) -> SmtpResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
            metrics: Arc::new(ServiceMetrics::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a plain-text email.
    ///
    /// An empty or unparseable `from` falls back to the configured
    /// `default_from`. Every `to` entry must be a valid address and at least
    /// one is required.
    pub async fn send_email<S>(&self, from: &str, to: &[S], subject: &str, body: &str) -> SmtpResult<SendResult>
    where
        S: AsRef<str> + Sync,
    {
        self.deliver(from, to, subject, body, &HeaderMap::new()).await
    }

    /// Sends a plain-text email with extra headers.
    ///
    /// A `Reply-To` entry (any casing) is parsed as a list of addresses;
    /// other headers are passed through.
    pub async fn send_email_with_headers<S>(
        &self,
        from: &str,
        to: &[S],
        subject: &str,
        body: &str,
        headers: &HeaderMap,
    ) -> SmtpResult<SendResult>
    where
        S: AsRef<str> + Sync,
    {
        self.deliver(from, to, subject, body, headers).await
    }

    /// Composes, renders and delivers one message.
    pub(crate) async fn deliver<S>(
        &self,
        from: &str,
        to: &[S],
        subject: &str,
        body: &str,
        headers: &HeaderMap,
    ) -> SmtpResult<SendResult>
    where
        S: AsRef<str> + Sync,
    {
        let timer = Timer::start("send_email");
        let result = self.compose_and_send(from, to, subject, body, headers).await;
        let duration = timer.stop();

        match result {
            Ok(rendered) => {
                self.metrics.record_delivered(duration);

                #[cfg(feature = "tracing")]
                tracing::info!(
                    message_id = %rendered.message_id,
                    sender = %rendered.envelope.sender,
                    recipients = rendered.envelope.recipients.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Message delivered"
                );

                Ok(SendResult {
                    message_id: rendered.message_id,
                    envelope: rendered.envelope,
                    duration,
                })
            }
            Err(e) => {
                self.metrics.record_failure(&e);

                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Send failed");

                Err(e)
            }
        }
    }

    async fn compose_and_send<S>(
        &self,
        from: &str,
        to: &[S],
        subject: &str,
        body: &str,
        headers: &HeaderMap,
    ) -> SmtpResult<RenderedMessage>
    where
        S: AsRef<str> + Sync,
    {
        let message = compose::compose(from, to, subject, body, headers, &self.config.default_from)?;
        let rendered = compose::render(&message)?;
        self.transport.send(&rendered.envelope, &rendered.raw).await?;
        Ok(rendered)
    }
}

impl<T: Transport> fmt::Debug for Service<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
