//! Delivery counters for the notification service.
//!
//! Events are logged through `tracing` (feature `tracing`). The counters
//! here are what callers poll: how many messages went out, where failed
//! sends broke down, and how long deliveries take on average.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::errors::SmtpError;

/// Counters shared by a [`Service`](crate::Service) and its SMTP transport.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    delivered: AtomicU64,
    compose_failures: AtomicU64,
    transport_failures: AtomicU64,
    notifications_skipped: AtomicU64,
    tls_upgrades: AtomicU64,
    auth_attempts: AtomicU64,
    auth_failures: AtomicU64,
    delivery_micros: AtomicU64,
}

impl ServiceMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message the transport accepted, and how long it took.
    pub fn record_delivered(&self, elapsed: Duration) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.delivery_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Records a failed send, split by whether the transport was reached.
    pub fn record_failure(&self, error: &SmtpError) {
        let counter = if error.is_transport() {
            &self.transport_failures
        } else {
            &self.compose_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a notification skipped because no operators are configured.
    pub fn record_notification_skipped(&self) {
        self.notifications_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session upgraded to TLS.
    pub fn record_tls_upgrade(&self) {
        self.tls_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one AUTH exchange.
    pub fn record_auth(&self, success: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            compose_failures: self.compose_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            notifications_skipped: self.notifications_skipped.load(Ordering::Relaxed),
            tls_upgrades: self.tls_upgrades.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            delivery_time: Duration::from_micros(self.delivery_micros.load(Ordering::Relaxed)),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.delivered,
            &self.compose_failures,
            &self.transport_failures,
            &self.notifications_skipped,
            &self.tls_upgrades,
            &self.auth_attempts,
            &self.auth_failures,
            &self.delivery_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`ServiceMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages accepted by the transport.
    pub delivered: u64,
    /// Sends rejected before the transport was called (bad address, header, recipients).
    pub compose_failures: u64,
    /// Sends the transport failed (connection, TLS, auth, SMTP rejection).
    pub transport_failures: u64,
    /// Notifications skipped with no operators configured.
    pub notifications_skipped: u64,
    /// Sessions upgraded to TLS.
    pub tls_upgrades: u64,
    /// AUTH exchanges.
    pub auth_attempts: u64,
    /// AUTH exchanges the server refused.
    pub auth_failures: u64,
    /// Total time spent in successful deliveries.
    pub delivery_time: Duration,
}

impl MetricsSnapshot {
    /// Failed sends of either kind.
    pub fn failed(&self) -> u64 {
        self.compose_failures + self.transport_failures
    }

    /// Fraction of sends that were delivered; 1.0 before any send.
    pub fn success_rate(&self) -> f64 {
        let total = self.delivered + self.failed();
        if total == 0 {
            1.0
        } else {
            self.delivered as f64 / total as f64
        }
    }

    /// Mean duration of a successful delivery.
    pub fn average_delivery_time(&self) -> Option<Duration> {
        u32::try_from(self.delivered)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.delivery_time / n)
    }
}

/// Measures one send from composition to the transport's answer.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Starts timing `operation`.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Name given at start.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Stops the timer.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::trace!(
            operation = self.operation(),
            duration_ms = elapsed.as_millis() as u64,
            "Operation finished"
        );

        elapsed
    }
}
