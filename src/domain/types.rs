use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Routing key used for the single message of a JSON flush.
pub const JSON_ROUTING_KEY: &str = "json_payload";

/// Application identifier stamped on every published message.
pub const APP_ID: &str = "statsdAMQP";

/// Wire format of published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// One `name value timestamp\n` line per message
    Graphite,
    /// One message carrying the whole snapshot
    #[default]
    Json,
}

impl MessageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            MessageFormat::Graphite => "text/graphite",
            MessageFormat::Json => "application/json",
        }
    }
}

impl FromStr for MessageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "graphite" => Ok(MessageFormat::Graphite),
            "json" => Ok(MessageFormat::Json),
            _ => anyhow::bail!(
                "Invalid message format: {}. Must be 'graphite' or 'json'",
                s
            ),
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFormat::Graphite => write!(f, "graphite"),
            MessageFormat::Json => write!(f, "json"),
        }
    }
}

/// One message to publish: routing key plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl PublishRecord {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, for logging. Graphite payloads are always ASCII.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// AMQP basic properties attached to every message of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: &'static str,
    pub app_id: &'static str,
    /// Delivery mode 2 when set
    pub persistent: bool,
}

impl MessageProperties {
    pub fn for_format(format: MessageFormat) -> Self {
        Self {
            content_type: format.content_type(),
            app_id: APP_ID,
            persistent: true,
        }
    }
}
