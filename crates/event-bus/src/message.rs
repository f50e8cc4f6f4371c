//! Wire message: a body plus a flat string metadata map.

use std::collections::BTreeMap;

use crate::{
    error::{EventBusError, Result},
    event::{Event, EventKind, Priority, Provider},
    transaction::Transaction,
};

/// Metadata keys carried on every saga-related message.
pub mod keys {
    pub const TRANSACTION_ID: &str = "transaction_id";
    pub const ROOT_ID: &str = "root_id";
    pub const SPAN_ID: &str = "span_id";
    pub const TRACE_ID: &str = "trace_id";
    pub const OPERATION: &str = "operation";
    pub const BACKUP: &str = "backup";
    pub const SERVICE: &str = "service";
    pub const EVENT_ID: &str = "event_id";
    pub const EVENT_TYPE: &str = "event_type";
    pub const PRIORITY: &str = "priority";
    pub const PROVIDER: &str = "provider";
    pub const DISPATCH_TIME: &str = "dispatch_time";
    pub const STATUS_CODE: &str = "status_code";
    pub const MESSAGE: &str = "message";
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub topic: String,
    pub body: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Encodes an event and its transaction envelope for `topic`.
    pub fn encode(topic: impl Into<String>, event: Event, transaction: &Transaction) -> Self {
        let mut metadata = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            metadata.insert(k.to_string(), v);
        };
        put(keys::TRANSACTION_ID, transaction.id.clone());
        put(keys::ROOT_ID, transaction.root_id.clone());
        put(keys::SPAN_ID, transaction.span_id.clone());
        put(keys::TRACE_ID, transaction.trace_id.clone());
        put(keys::OPERATION, transaction.operation.clone());
        put(keys::BACKUP, transaction.backup.clone());
        put(keys::SERVICE, event.service_name);
        put(keys::EVENT_ID, event.id);
        put(keys::EVENT_TYPE, event.kind.as_str().to_string());
        put(keys::PRIORITY, event.priority.as_str().to_string());
        put(keys::PROVIDER, event.provider.as_str().to_string());
        put(keys::DISPATCH_TIME, event.dispatch_time.to_string());

        Self {
            topic: topic.into(),
            body: event.content,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Returns a metadata value, treating empty strings as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(EventBusError::MissingMetadata(key))
    }

    /// Decodes the transaction envelope.
    ///
    /// Only the transaction id is mandatory; a producer that does not trace
    /// leaves span and trace ids empty.
    pub fn transaction(&self) -> Result<Transaction> {
        Ok(Transaction {
            id: self.require(keys::TRANSACTION_ID)?.to_string(),
            root_id: self.get(keys::ROOT_ID).unwrap_or_default().to_string(),
            span_id: self.get(keys::SPAN_ID).unwrap_or_default().to_string(),
            trace_id: self.get(keys::TRACE_ID).unwrap_or_default().to_string(),
            operation: self.get(keys::OPERATION).unwrap_or_default().to_string(),
            backup: self.get(keys::BACKUP).unwrap_or_default().to_string(),
        })
    }

    /// Decodes the event header and body.
    pub fn event(&self) -> Result<Event> {
        Ok(Event {
            id: self.require(keys::EVENT_ID)?.to_string(),
            service_name: self.require(keys::SERVICE)?.to_string(),
            kind: self
                .get(keys::EVENT_TYPE)
                .and_then(EventKind::parse)
                .unwrap_or(EventKind::Domain),
            priority: self
                .get(keys::PRIORITY)
                .and_then(Priority::parse)
                .unwrap_or(Priority::Low),
            provider: Provider::new(self.get(keys::PROVIDER).unwrap_or(Provider::MEMORY)),
            content: self.body.clone(),
            dispatch_time: self
                .get(keys::DISPATCH_TIME)
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
        })
    }

    /// Name of the service that produced the message.
    pub fn service(&self) -> Option<&str> {
        self.get(keys::SERVICE)
    }

    /// Integer status code of an outcome message.
    pub fn status_code(&self) -> Option<u16> {
        self.get(keys::STATUS_CODE).and_then(|c| c.parse().ok())
    }
}
