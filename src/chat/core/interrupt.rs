//! Human-in-the-loop interrupts: typed requests, resume payloads and the
//! named suspension points a handler can be parked at.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Subject used for summary emails.
pub const EMAIL_SUBJECT: &str = "Document Summary";

const PREVIEW_CHARS: usize = 200;

/// One input field requested from the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    /// Key expected in the resume payload.
    pub name: String,
    /// Human label.
    pub label: String,
    /// Input widget hint (`email`, `text`, ...).
    pub input_type: String,
    /// Whether the field must be non-empty.
    pub required: bool,
}

impl InputField {
    fn required(name: &str, label: &str, input_type: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            input_type: input_type.to_string(),
            required: true,
        }
    }
}

/// Preview of the email awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPreview {
    /// Recipient name.
    pub to_name: String,
    /// Recipient address.
    pub to_email: String,
    /// Subject line.
    pub subject: String,
    /// Body, truncated for display.
    pub body_preview: String,
}

/// Payload shown to the caller while a handler is suspended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterruptRequest {
    /// Ask for recipient address and name.
    EmailInputRequest {
        /// Prompt text.
        message: String,
        /// Requested fields.
        fields: Vec<InputField>,
    },
    /// Ask to confirm the send.
    EmailConfirmationRequest {
        /// Prompt text.
        message: String,
        /// What would be sent.
        preview: EmailPreview,
    },
}

impl InterruptRequest {
    /// Request for the recipient of a summary email.
    #[must_use]
    pub fn email_input() -> Self {
        Self::EmailInputRequest {
            message: "Please provide the recipient's email address and name.".to_string(),
            fields: vec![
                InputField::required("email", "Email Address", "email"),
                InputField::required("name", "Recipient Name", "text"),
            ],
        }
    }

    /// Request to confirm sending `body` to the recipient.
    #[must_use]
    pub fn email_confirmation(email: &str, name: &str, body: &str) -> Self {
        Self::EmailConfirmationRequest {
            message: format!("Send summary email to {name} at {email}?"),
            preview: EmailPreview {
                to_name: name.to_string(),
                to_email: email.to_string(),
                subject: EMAIL_SUBJECT.to_string(),
                body_preview: preview(body),
            },
        }
    }
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Where a suspended handler resumes, with the data it had already validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "point", rename_all = "snake_case")]
pub enum SuspensionPoint {
    /// Email handler waiting for the recipient.
    EmailAwaitingRecipient {
        /// Content to send.
        summary: String,
    },
    /// Email handler waiting for the send confirmation.
    EmailAwaitingConfirmation {
        /// Content to send.
        summary: String,
        /// Validated recipient address.
        email: String,
        /// Validated recipient name.
        name: String,
    },
}

impl SuspensionPoint {
    /// Stable name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EmailAwaitingRecipient { .. } => "email.awaiting_recipient",
            Self::EmailAwaitingConfirmation { .. } => "email.awaiting_confirmation",
        }
    }
}

/// Durable record of an outstanding interrupt for a thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    /// Payload shown to the caller.
    pub request: InterruptRequest,
    /// Re-entry point.
    pub point: SuspensionPoint,
}

/// Recipient data supplied on resume. Missing fields read as empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecipientResponse {
    /// Trimmed address.
    pub email: String,
    /// Trimmed name.
    pub name: String,
}

impl RecipientResponse {
    /// Read the resume payload.
    #[must_use]
    pub fn from_resume(value: &Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            email: field("email"),
            name: field("name"),
        }
    }

    /// Both fields must be present.
    ///
    /// # Errors
    /// Returns `InterruptValidation` when either field is blank.
    pub fn validate(&self) -> ChatResult<()> {
        if self.email.is_empty() || self.name.is_empty() {
            return Err(ChatError::InterruptValidation(
                "email and name are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether the resume payload confirms the pending action.
#[must_use]
pub fn is_confirmed(value: &Value) -> bool {
    value
        .get("confirmed")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// What `GetInterruptStatus` reports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptStatus {
    /// Whether the thread is suspended.
    pub has_interrupt: bool,
    /// The outstanding request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt_payload: Option<InterruptRequest>,
}

impl From<Option<PendingInterrupt>> for InterruptStatus {
    fn from(pending: Option<PendingInterrupt>) -> Self {
        Self {
            has_interrupt: pending.is_some(),
            interrupt_payload: pending.map(|pending| pending.request),
        }
    }
}
