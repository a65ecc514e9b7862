//! Order confirmation notifications.
//!
//! Sent once per newly issued download grant. Delivery is best-effort:
//! callers log failures and carry on, so a mail outage never blocks payment
//! finalization.

use askama::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use wallcraft_core::{Email, OrderNumber, Price};

use crate::config::EmailConfig;

/// Everything the buyer needs to fetch one purchased wallpaper.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub to: Email,
    pub order_number: OrderNumber,
    pub wallpaper_title: String,
    pub price: Price,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("could not assemble message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("bad mailbox {0:?}")]
    InvalidAddress(String),
    #[error("could not render template: {0}")]
    Template(#[from] askama::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
    order_number: &'a str,
    wallpaper_title: &'a str,
    price: &'a str,
    download_url: &'a str,
    expires_at: &'a str,
}

#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
    order_number: &'a str,
    wallpaper_title: &'a str,
    price: &'a str,
    download_url: &'a str,
    expires_at: &'a str,
}

fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%A, %B %-d, %Y at %H:%M UTC").to_string()
}

/// SMTP delivery with HTML and plain text bodies.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailNotifier {
    /// Connect to the STARTTLS relay named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Smtp` if the relay host is unusable.
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.expose_secret().to_owned(),
            ))
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }
}

fn mailbox(raw: &str) -> Result<Mailbox, NotificationError> {
    raw.parse()
        .map_err(|_| NotificationError::InvalidAddress(raw.to_owned()))
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let price = confirmation.price.display();
        let expires_at = format_expiry(confirmation.expires_at);

        let html = OrderConfirmationHtml {
            order_number: confirmation.order_number.as_str(),
            wallpaper_title: &confirmation.wallpaper_title,
            price: &price,
            download_url: &confirmation.download_url,
            expires_at: &expires_at,
        }
        .render()?;
        let text = OrderConfirmationText {
            order_number: confirmation.order_number.as_str(),
            wallpaper_title: &confirmation.wallpaper_title,
            price: &price,
            download_url: &confirmation.download_url,
            expires_at: &expires_at,
        }
        .render()?;

        let message = Message::builder()
            .from(mailbox(&self.from_address)?)
            .to(mailbox(confirmation.to.as_str())?)
            .subject(format!("Your WallCraft Purchase - {}", confirmation.wallpaper_title))
            .multipart(MultiPart::alternative_plain_html(text, html))?;
        self.mailer.send(message).await?;

        info!(order_number = %confirmation.order_number, "Order confirmation sent");
        Ok(())
    }
}

/// Records confirmations in the log instead of sending mail.
///
/// Used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            order_number = %confirmation.order_number,
            wallpaper = %confirmation.wallpaper_title,
            expires_at = %confirmation.expires_at,
            "Order confirmation (email disabled)"
        );
        Ok(())
    }
}
