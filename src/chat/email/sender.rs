//! Email delivery capability.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client as ReqwestClient;
use serde::Serialize;
use tracing::{info, warn};

use crate::chat::core::config::EmailConfig;
use crate::chat::core::errors::{ChatError, ChatResult};

/// Boxed future type for email operations.
pub type EmailFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An outgoing message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    /// Recipient address.
    pub to_email: String,
    /// Recipient name.
    pub to_name: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivery outcome, reported verbatim to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailResult {
    /// Whether the message was accepted.
    pub success: bool,
    /// Failure reason.
    pub error_message: Option<String>,
}

impl EmailResult {
    /// Successful delivery.
    #[must_use]
    pub const fn sent() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// Failed delivery.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(reason.into()),
        }
    }
}

/// Capability to send an email. Failures are values, not errors.
pub trait EmailSender: Send + Sync {
    /// Send `message`.
    fn send_email(&self, message: EmailMessage) -> EmailFuture<'_, EmailResult>;
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from_email: &'a str,
    from_name: &'a str,
    #[serde(flatten)]
    message: &'a EmailMessage,
}

/// Sends through an HTTP relay accepting a JSON payload.
pub struct HttpEmailSender {
    client: ReqwestClient,
    relay_url: String,
    api_key: Option<String>,
    sender_email: String,
    sender_name: String,
}

impl HttpEmailSender {
    /// Create a sender for `config.relay_url`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when no relay URL is set, or an HTTP error if the
    /// client cannot be built.
    pub fn new(config: &EmailConfig) -> ChatResult<Self> {
        let relay_url = config
            .relay_url
            .clone()
            .ok_or_else(|| ChatError::InvalidConfig("email.relay_url is not set".to_string()))?;
        url::Url::parse(&relay_url)?;
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            relay_url,
            api_key: config.api_key.clone(),
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
        })
    }

    async fn deliver(&self, message: &EmailMessage) -> ChatResult<()> {
        let payload = RelayPayload {
            from_email: &self.sender_email,
            from_name: &self.sender_name,
            message,
        };
        let mut request = self.client.post(&self.relay_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::EmailDelivery(format!("relay returned {status}: {body}")));
        }
        Ok(())
    }
}

impl EmailSender for HttpEmailSender {
    fn send_email(&self, message: EmailMessage) -> EmailFuture<'_, EmailResult> {
        Box::pin(async move {
            match self.deliver(&message).await {
                Ok(()) => {
                    info!(to = %message.to_email, "email sent");
                    EmailResult::sent()
                }
                Err(err) => {
                    warn!(to = %message.to_email, error = %err, "email delivery failed");
                    EmailResult::failed(err.to_string())
                }
            }
        })
    }
}

/// Used when no relay is configured; every send fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledEmailSender;

impl EmailSender for DisabledEmailSender {
    fn send_email(&self, _message: EmailMessage) -> EmailFuture<'_, EmailResult> {
        Box::pin(async { EmailResult::failed("email delivery is not configured") })
    }
}

/// Sender matching the configuration.
///
/// # Errors
/// Returns an error if a configured relay cannot be used.
pub fn sender_from_config(config: &EmailConfig) -> ChatResult<std::sync::Arc<dyn EmailSender>> {
    if config.relay_url.is_some() {
        Ok(std::sync::Arc::new(HttpEmailSender::new(config)?))
    } else {
        Ok(std::sync::Arc::new(DisabledEmailSender))
    }
}
