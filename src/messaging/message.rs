//! # Message Types
//!
//! Application-facing publish requests, bulk request/response shapes, and the
//! broker envelopes they are mapped to.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::MessagingError;
use crate::constants::metadata_keys;

/// Single publish request from the application layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            content_type: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One entry of a bulk publish request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkPublishEntry {
    pub entry_id: String,
    pub event: Vec<u8>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BulkPublishEntry {
    pub fn new(entry_id: impl Into<String>, event: impl Into<Vec<u8>>) -> Self {
        Self {
            entry_id: entry_id.into(),
            event: event.into(),
            content_type: None,
            metadata: HashMap::new(),
        }
    }
}

/// Bulk publish request; request-level metadata carries batch options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkPublishRequest {
    pub topic: String,
    pub entries: Vec<BulkPublishEntry>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Outcome recorded for a bulk publish entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkPublishStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPublishResponseEntry {
    pub entry_id: String,
    pub status: BulkPublishStatus,
    pub error: Option<String>,
}

/// Bulk publish response.
///
/// The broker reports a single outcome for the whole batch, so every entry
/// always carries the same status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPublishResponse {
    pub statuses: Vec<BulkPublishResponseEntry>,
}

impl BulkPublishResponse {
    /// Build a response that applies `status` to every entry
    pub fn new(
        entries: &[BulkPublishEntry],
        status: BulkPublishStatus,
        error: Option<&MessagingError>,
    ) -> Self {
        let error = error.map(ToString::to_string);
        Self {
            statuses: entries
                .iter()
                .map(|entry| BulkPublishResponseEntry {
                    entry_id: entry.entry_id.clone(),
                    status,
                    error: error.clone(),
                })
                .collect(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.statuses
            .iter()
            .all(|s| s.status == BulkPublishStatus::Succeeded)
    }
}

/// Broker envelope sent by a [`Sender`](crate::messaging::Sender)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message_id: Option<String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub time_to_live: Option<Duration>,
    #[serde(default)]
    pub application_properties: HashMap<String, String>,
}

impl BrokerMessage {
    /// Map a publish request onto a broker envelope.
    ///
    /// Well-known metadata keys become envelope fields; everything else is
    /// carried as application properties.
    pub fn from_publish_request(request: &PublishRequest) -> Result<Self, MessagingError> {
        Self::from_parts(
            request.data.clone(),
            request.content_type.clone(),
            &request.metadata,
        )
    }

    /// Map a bulk entry onto a broker envelope
    pub fn from_bulk_entry(entry: &BulkPublishEntry) -> Result<Self, MessagingError> {
        let mut message =
            Self::from_parts(entry.event.clone(), entry.content_type.clone(), &entry.metadata)?;
        if message.message_id.is_none() && !entry.entry_id.is_empty() {
            message.message_id = Some(entry.entry_id.clone());
        }
        Ok(message)
    }

    fn from_parts(
        body: Vec<u8>,
        content_type: Option<String>,
        metadata: &HashMap<String, String>,
    ) -> Result<Self, MessagingError> {
        let mut message = BrokerMessage {
            body,
            content_type,
            ..Default::default()
        };

        for (key, value) in metadata {
            match key.as_str() {
                metadata_keys::MESSAGE_ID => message.message_id = Some(value.clone()),
                metadata_keys::SESSION_ID => message.session_id = Some(value.clone()),
                metadata_keys::CORRELATION_ID => message.correlation_id = Some(value.clone()),
                metadata_keys::TTL_IN_SECONDS => {
                    let seconds: u64 = value.trim().parse().map_err(|_| {
                        MessagingError::configuration(
                            "message",
                            format!("invalid {}: {value}", metadata_keys::TTL_IN_SECONDS),
                        )
                    })?;
                    message.time_to_live = Some(Duration::from_secs(seconds));
                }
                _ => {
                    message
                        .application_properties
                        .insert(key.clone(), value.clone());
                }
            }
        }

        Ok(message)
    }

    /// Approximate encoded size used for batch limits
    pub fn encoded_len(&self) -> usize {
        let props: usize = self
            .application_properties
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.body.len()
            + props
            + self.message_id.as_ref().map_or(0, String::len)
            + self.session_id.as_ref().map_or(0, String::len)
            + self.correlation_id.as_ref().map_or(0, String::len)
            + self.content_type.as_ref().map_or(0, String::len)
    }
}

/// Size-bounded batch of envelopes sent in a single broker call
#[derive(Debug, Clone)]
pub struct MessageBatch {
    max_bytes: u64,
    size_bytes: u64,
    messages: Vec<BrokerMessage>,
}

impl MessageBatch {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            size_bytes: 0,
            messages: Vec::new(),
        }
    }

    /// Append a message, failing if it would push the batch over its byte limit
    pub fn add_message(&mut self, message: BrokerMessage) -> Result<(), MessagingError> {
        let len = message.encoded_len() as u64;
        if self.size_bytes + len > self.max_bytes {
            return Err(MessagingError::MessageTooLarge {
                size_bytes: (self.size_bytes + len) as usize,
                limit_bytes: self.max_bytes as usize,
            });
        }
        self.size_bytes += len;
        self.messages.push(message);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn into_messages(self) -> Vec<BrokerMessage> {
        self.messages
    }
}

/// Message delivered by a receiver under a peek-lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub lock_token: String,
    pub sequence_number: i64,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub session_id: Option<String>,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub application_properties: HashMap<String, String>,
}

/// Message handed to a single-message handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl TopicMessage {
    pub fn from_received(topic: &str, message: &ReceivedMessage) -> Self {
        Self {
            topic: topic.to_string(),
            data: message.body.clone(),
            content_type: message.content_type.clone(),
            metadata: delivery_metadata(message),
        }
    }
}

/// One entry of a bulk delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMessageEntry {
    pub entry_id: String,
    pub event: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Batch handed to a bulk handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMessage {
    pub topic: String,
    pub entries: Vec<BulkMessageEntry>,
}

impl BulkMessage {
    pub fn from_received(topic: &str, messages: &[ReceivedMessage]) -> Self {
        Self {
            topic: topic.to_string(),
            entries: messages
                .iter()
                .map(|m| BulkMessageEntry {
                    entry_id: m.message_id.clone(),
                    event: m.body.clone(),
                    content_type: m.content_type.clone(),
                    metadata: delivery_metadata(m),
                })
                .collect(),
        }
    }
}

fn delivery_metadata(message: &ReceivedMessage) -> HashMap<String, String> {
    let mut metadata = message.application_properties.clone();
    metadata.insert(
        metadata_keys::MESSAGE_ID.to_string(),
        message.message_id.clone(),
    );
    metadata.insert(
        metadata_keys::DELIVERY_COUNT.to_string(),
        message.delivery_count.to_string(),
    );
    metadata.insert(
        metadata_keys::ENQUEUED_TIME_UTC.to_string(),
        message.enqueued_at.to_rfc3339(),
    );
    if let Some(session_id) = &message.session_id {
        metadata.insert(metadata_keys::SESSION_ID.to_string(), session_id.clone());
    }
    metadata
}
