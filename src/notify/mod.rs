//! Notifications to the configured operator list.
//!
//! Notifications always come from `default_from` and go to every address
//! in `notify_addresses`. With no addresses configured they are a no-op.

use crate::errors::SmtpResult;
use crate::service::Service;
use crate::transport::Transport;
use crate::types::{HeaderMap, SendResult};

impl<T: Transport> Service<T> {
    /// Notifies the operators.
    ///
    /// Returns `Ok(None)` without composing anything when no notify
    /// addresses are configured.
    pub async fn notify(&self, subject: &str, body: &str) -> SmtpResult<Option<SendResult>> {
        self.notify_with_headers(subject, body, &HeaderMap::new()).await
    }

    /// Notifies the operators with extra headers.
    pub async fn notify_with_headers(
        &self,
        subject: &str,
        body: &str,
        headers: &HeaderMap,
    ) -> SmtpResult<Option<SendResult>> {
        let recipients = &self.config().notify_addresses;
        if recipients.is_empty() {
            self.metrics().record_notification_skipped();

            #[cfg(feature = "tracing")]
            tracing::debug!(subject = %subject, "No notify addresses configured, skipping notification");

            return Ok(None);
        }

        self.deliver("", recipients.as_slice(), subject, body, headers)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServiceConfig;
    use crate::errors::SmtpErrorKind;
    use crate::mocks::{FailingTransport, RecordingTransport};
    use crate::service::Service;
    use crate::types::HeaderMap;

    fn config(notify: &[&str]) -> ServiceConfig {
        ServiceConfig::builder()
            .host("127.0.0.1")
            .default_from("\"Notifier\" <noreply@x.org>")
            .notify_addresses(notify.iter().copied())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_notify_without_operators_is_noop() {
        let transport = RecordingTransport::new();
        let service = Service::with_transport(config(&[]), transport.clone()).unwrap();

        assert!(service.notify("s", "b").await.unwrap().is_none());
        assert!(service
            .notify_with_headers("s", "b", &HeaderMap::new())
            .await
            .unwrap()
            .is_none());

        assert_eq!(transport.calls(), 0);
        assert!(transport.last().is_none());
        assert_eq!(service.metrics().snapshot().notifications_skipped, 2);
    }

    #[tokio::test]
    async fn test_notify_noop_ignores_bad_headers() {
        let service = Service::with_transport(
            config(&[]),
            FailingTransport::new(SmtpErrorKind::ConnectionRefused),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("Reply-To".to_string(), vec!["not an address".to_string()]);
        assert!(service.notify_with_headers("s", "b", &headers).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notify_sends_from_default_to_operators() {
        let transport = RecordingTransport::new();
        let service = Service::with_transport(
            config(&["\"Ops\" <ops@x.org>", "oncall@x.org"]),
            transport.clone(),
        )
        .unwrap();

        let result = service.notify("disk full", "sda1 at 99%").await.unwrap().unwrap();
        assert_eq!(result.envelope.sender, "noreply@x.org");
        assert_eq!(result.envelope.recipients, ["ops@x.org", "oncall@x.org"]);

        let delivery = transport.last().unwrap();
        assert_eq!(delivery.header("From").as_deref(), Some("Notifier <noreply@x.org>"));
        assert_eq!(delivery.header("To").as_deref(), Some("Ops <ops@x.org>, oncall@x.org"));
        assert_eq!(delivery.header("Subject").as_deref(), Some("disk full"));
        assert_eq!(delivery.body(), "sda1 at 99%\r\n");
    }

    #[tokio::test]
    async fn test_notify_with_headers_keeps_reply_to() {
        let transport = RecordingTransport::new();
        let service = Service::with_transport(config(&["ops@x.org"]), transport.clone()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("Reply-To".to_string(), vec!["archive@x.org".to_string()]);
        headers.insert("X-Priority".to_string(), vec!["1".to_string()]);
        service.notify_with_headers("s", "b", &headers).await.unwrap();

        let delivery = transport.last().unwrap();
        assert_eq!(delivery.header("Reply-To").as_deref(), Some("archive@x.org"));
        assert_eq!(delivery.header("X-Priority").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_notify_surfaces_transport_errors() {
        let service = Service::with_transport(
            config(&["ops@x.org"]),
            FailingTransport::new(SmtpErrorKind::RecipientRejected),
        )
        .unwrap();

        let err = service.notify("s", "b").await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::RecipientRejected);
    }
}
