//! Event records, metadata and the event-type registry.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifies the stream owned by one aggregate instance, e.g. `Order-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wraps a raw stream identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the conventional `<Kind>-<id>` stream name for an aggregate.
    #[must_use]
    pub fn for_aggregate(kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("{kind}-{id}"))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Causation, correlation and user context attached to an event.
///
/// Opaque to the store: it is persisted and returned verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID for tracing a command through its effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Causation ID linking this event to the event/command that caused it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    /// The acting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Any additional caller-defined keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventMetadata {
    /// Metadata for an event caused directly by a command.
    #[must_use]
    pub fn for_command(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            causation_id: Some(correlation_id),
            ..Self::default()
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// An immutable, persisted domain fact.
///
/// Created only by an event store at append time; never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Store-assigned global position; strictly increasing across all streams.
    pub id: i64,
    /// The owning stream.
    pub stream_id: StreamId,
    /// 1-based, contiguous position within the stream.
    pub version: i64,
    /// Discriminator used to pick a decoder.
    pub event_type: String,
    /// Serialized payload.
    pub data: serde_json::Value,
    /// Causation/correlation/user context.
    pub metadata: EventMetadata,
    /// Assignment timestamp.
    pub occurred_at: DateTime<Utc>,
}

/// An event the caller wants appended. The store assigns id, version and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Discriminator used to pick a decoder.
    pub event_type: String,
    /// Serialized payload.
    pub data: serde_json::Value,
    /// Causation/correlation/user context.
    pub metadata: EventMetadata,
}

impl NewEvent {
    /// Creates an event with empty metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EventMetadata::default(),
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Encodes a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn from_domain<E: DomainEvent>(
        event: &E,
        metadata: EventMetadata,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            event_type: event.event_type().to_owned(),
            data: event.to_payload()?,
            metadata,
        })
    }
}

/// Trait that all typed domain events implement.
///
/// Implementors are a tagged union over every event kind an aggregate can
/// receive, paired with a registry that decodes each discriminator.
pub trait DomainEvent: Send + Sync + fmt::Debug + Sized + 'static {
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if encoding fails.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Builds the discriminator → decoder table for this event type.
    fn registry() -> EventRegistry<Self>;
}

/// Decodes one payload into a typed event.
pub type Decoder<E> = fn(serde_json::Value) -> Result<E, serde_json::Error>;

/// Static mapping from event discriminator to decoder, built once at
/// construction time.
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E> EventRegistry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers a decoder for `event_type`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, event_type: &'static str, decoder: Decoder<E>) -> Self {
        self.decoders.insert(event_type, decoder);
        self
    }

    /// Returns `true` if `event_type` has a decoder.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// All registered discriminators, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Decodes a payload by discriminator.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` if no decoder is registered and
    /// `DomainError::Serialization` if the payload does not match it.
    pub fn decode(&self, event_type: &str, data: &serde_json::Value) -> Result<E, DomainError> {
        let decoder =
            self.decoders
                .get(event_type)
                .ok_or_else(|| DomainError::UnknownEventType {
                    event_type: event_type.to_owned(),
                })?;
        decoder(data.clone()).map_err(|e| {
            DomainError::Serialization(format!("failed to decode {event_type}: {e}"))
        })
    }

    /// Decodes a stored record.
    ///
    /// # Errors
    ///
    /// See [`EventRegistry::decode`].
    pub fn decode_record(&self, record: &EventRecord) -> Result<E, DomainError> {
        self.decode(&record.event_type, &record.data)
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
        }
    }
}

impl<E> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
