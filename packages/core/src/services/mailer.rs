//! Outbound notification transport.
//!
//! The engine only produces addressed messages; everything transport-shaped
//! sits behind [`Notifier`] so the dispatcher and the dispense-time check can
//! be tested without an SMTP server. [`SmtpNotifier`] is the production
//! implementation; [`ConsoleNotifier`] is the dev fallback used when SMTP is
//! not configured, mirroring a local setup where emails land in the log.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpSettings;
use crate::error::AppError;

/// Delivers one addressed message. Implementations must not retry
/// internally; retry policy belongs to the dispatcher.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), AppError>;

    /// Name for logging/debugging.
    fn notifier_name(&self) -> &str;
}

/// SMTP delivery via lettre (STARTTLS + credentials), sending multipart
/// text+HTML messages.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, AppError> {
        let credentials =
            Credentials::new(settings.username.clone(), settings.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|err| AppError::notify(format!("SMTP relay setup failed: {}", err)))?
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: settings.from_address.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| AppError::notify(format!("invalid from address: {}", self.from_address)))?,
            )
            .to(to
                .parse()
                .map_err(|_| AppError::notify(format!("invalid recipient address: {}", to)))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|err| AppError::notify(format!("failed to build message: {}", err)))?;

        self.mailer
            .send(message)
            .await
            .map_err(|err| AppError::notify(format!("SMTP send failed: {}", err)))?;

        tracing::info!(to = %to, subject = %subject, "email sent");
        Ok(())
    }

    fn notifier_name(&self) -> &str {
        "smtp"
    }
}

/// Logs messages instead of sending them. Used when SMTP is unconfigured.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        _html_body: &str,
    ) -> Result<(), AppError> {
        tracing::info!(to = %to, subject = %subject, body = %text_body, "email (console)");
        Ok(())
    }

    fn notifier_name(&self) -> &str {
        "console"
    }
}
