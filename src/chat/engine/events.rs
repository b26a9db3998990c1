//! Events observed by the caller while a turn runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::chat::core::interrupt::InterruptRequest;

/// One item of a turn's output stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum TurnEvent {
    /// Incremental generated text.
    Token {
        /// Text fragment.
        text: String,
    },
    /// Progress indicator after a checkpointed step.
    ToolUpdate {
        /// Node that produced the update.
        node: String,
        /// Latest progress text.
        content: String,
    },
    /// The turn is suspended until resumed with an answer.
    Interrupt(InterruptRequest),
    /// The turn failed.
    Error {
        /// Failure description.
        message: String,
    },
    /// Last event of every stream.
    End,
}

impl TurnEvent {
    /// Event name used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolUpdate { .. } => "toolUpdate",
            Self::Interrupt(_) => "interrupt",
            Self::Error { .. } => "error",
            Self::End => "end",
        }
    }

    /// Payload without the event tag.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Whether this event closes the stream.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// Where handlers and the orchestrator publish events.
///
/// Sending waits for channel capacity, so a slow consumer slows generation.
/// A dropped consumer is ignored: the turn still runs to completion.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    /// Publish into `tx`.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    #[must_use]
    pub const fn discard() -> Self {
        Self { tx: None }
    }

    /// Publish an event.
    pub async fn emit(&self, event: TurnEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            trace!("event consumer disconnected");
        }
    }

    /// Publish a text fragment.
    pub async fn token(&self, text: &str) {
        self.emit(TurnEvent::Token {
            text: text.to_string(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = TurnEvent::ToolUpdate {
            node: "inquiry_handler".to_string(),
            content: "Handling inquiry".to_string(),
        };
        assert_eq!(event.name(), "toolUpdate");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "toolUpdate", "payload": {"node": "inquiry_handler", "content": "Handling inquiry"}})
        );
        assert_eq!(event.payload()["content"], "Handling inquiry");
        assert_eq!(TurnEvent::End.payload(), Value::Null);
    }

    #[test]
    fn test_interrupt_payload_is_request() {
        let event = TurnEvent::Interrupt(InterruptRequest::email_input());
        assert_eq!(event.payload()["type"], "email_input_request");
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_consumer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(tx);
        sink.token("still running").await;
        EventSink::discard().emit(TurnEvent::End).await;
    }
}
