//! Observability infrastructure for mail delivery.
//!
//! Counters are plain atomics; events go through `tracing` when the
//! feature is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Delivery metrics collector.
#[derive(Debug, Default)]
pub struct SmtpMetrics {
    /// Total emails sent successfully.
    pub emails_sent: AtomicU64,
    /// Total emails failed.
    pub emails_failed: AtomicU64,
    /// Emails rejected before any connection was made.
    pub emails_rejected: AtomicU64,
    /// Total connection attempts.
    pub connection_attempts: AtomicU64,
    /// Successful connections.
    pub connections_successful: AtomicU64,
    /// Failed connections.
    pub connections_failed: AtomicU64,
    /// Recipients accepted by the server.
    pub recipients_accepted: AtomicU64,
    /// Message bytes handed to the server.
    pub bytes_sent: AtomicU64,
}

impl SmtpMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful email send.
    pub fn record_send_success(&self, recipients: usize, bytes: usize) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
        self.recipients_accepted
            .fetch_add(recipients as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a failed email send.
    pub fn record_send_failure(&self) {
        self.emails_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an email that failed validation.
    pub fn record_rejected(&self) {
        self.emails_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection attempt.
    pub fn record_connection_attempt(&self, success: bool) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.connections_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            emails_failed: self.emails_failed.load(Ordering::Relaxed),
            emails_rejected: self.emails_rejected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_successful: self.connections_successful.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            recipients_accepted: self.recipients_accepted.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.emails_sent,
            &self.emails_failed,
            &self.emails_rejected,
            &self.connection_attempts,
            &self.connections_successful,
            &self.connections_failed,
            &self.recipients_accepted,
            &self.bytes_sent,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total emails sent successfully.
    pub emails_sent: u64,
    /// Total emails failed.
    pub emails_failed: u64,
    /// Emails rejected before connecting.
    pub emails_rejected: u64,
    /// Total connection attempts.
    pub connection_attempts: u64,
    /// Successful connections.
    pub connections_successful: u64,
    /// Failed connections.
    pub connections_failed: u64,
    /// Recipients accepted.
    pub recipients_accepted: u64,
    /// Message bytes sent.
    pub bytes_sent: u64,
}

impl MetricsSnapshot {
    /// Returns the email success rate, counting only emails that reached
    /// the network.
    pub fn success_rate(&self) -> f64 {
        let total = self.emails_sent + self.emails_failed;
        if total == 0 {
            1.0
        } else {
            self.emails_sent as f64 / total as f64
        }
    }

    /// Returns the connection success rate.
    pub fn connection_success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            1.0
        } else {
            self.connections_successful as f64 / self.connection_attempts as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );

        elapsed
    }
}
