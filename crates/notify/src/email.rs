//! SMTP delivery via `lettre` with TLS support.
//!
//! Sends completion and failure emails for export jobs. The TLS mode
//! follows the port: 465 uses implicit TLS, 587 uses STARTTLS, and
//! anything else connects in the clear (local relays).

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::traits::{Mailer, NotifyError};

/// SMTP connection settings, taken from the email config section.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Sender address, e.g. `"exports@example.org"` or
    /// `"Exports <exports@example.org>"`.
    pub from: String,
}

/// Sends export notifications through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a mailer from settings.
    ///
    /// SMTP credentials are resolved from the `SMTP_USERNAME` and
    /// `SMTP_PASSWORD` environment variables. If both are set, they are
    /// passed to the transport; otherwise the connection is
    /// unauthenticated.
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&settings.from)?;

        let mut builder = if settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(settings.port)
        } else if settings.port == 587 {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(settings.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse()
        .map_err(|e: lettre::address::AddressError| {
            NotifyError::Config(format!("invalid address '{addr}': {e}"))
        })
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        cc: Option<&str>,
    ) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?);
        if let Some(cc) = cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        let email = builder
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(to = %to, subject = %subject, cc = cc.is_some(), "email delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.org".to_string(),
            port,
            from: "exports@example.org".to_string(),
        }
    }

    #[test]
    fn parse_valid_address() {
        assert!(parse_mailbox("alice@example.org").is_ok());
    }

    #[test]
    fn parse_address_with_display_name() {
        let mb = parse_mailbox("Exports <exports@example.org>").unwrap();
        assert_eq!(mb.email.to_string(), "exports@example.org");
    }

    #[test]
    fn parse_invalid_address() {
        let err = parse_mailbox("not-an-email").unwrap_err();
        assert!(err.to_string().contains("Configuration error"), "got: {err}");
    }

    #[test]
    fn from_settings_implicit_tls_port() {
        assert!(SmtpMailer::from_settings(&settings(465)).is_ok());
    }

    #[test]
    fn from_settings_starttls_port() {
        assert!(SmtpMailer::from_settings(&settings(587)).is_ok());
    }

    #[test]
    fn from_settings_plain_port() {
        assert!(SmtpMailer::from_settings(&settings(25)).is_ok());
    }

    #[test]
    fn from_settings_invalid_from_address() {
        let result = SmtpMailer::from_settings(&SmtpSettings {
            host: "smtp.example.org".to_string(),
            port: 587,
            from: "bad-address".to_string(),
        });
        assert!(result.is_err());
    }
}
