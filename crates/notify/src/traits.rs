//! Mailer trait definition and shared error types.

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Trait for email delivery implementations.
///
/// The job executor depends on this seam, so tests can count sends
/// without a relay.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one HTML message. `cc` adds a secondary recipient when
    /// set (used for the operations address on failure emails).
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        cc: Option<&str>,
    ) -> Result<(), NotifyError>;
}
