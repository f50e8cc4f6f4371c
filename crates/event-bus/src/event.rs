//! Event model shared by every producer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Side effect inside the owning service's bounded context.
    Domain,
    /// Crosses service boundaries, usually as part of a saga.
    Integration,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Domain => "domain",
            EventKind::Integration => "integration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(EventKind::Domain),
            "integration" => Some(EventKind::Integration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Mid,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Mid => "mid",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "mid" => Some(Priority::Mid),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// Transport tag of the broker an event went through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    pub const KAFKA: &'static str = "KAFKA";
    pub const MEMORY: &'static str = "MEMORY";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_uppercase())
    }

    pub fn memory() -> Self {
        Self::new(Self::MEMORY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An event about to be sent or just received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Service that dispatched the event, upper-cased.
    pub service_name: String,
    pub kind: EventKind,
    pub priority: Priority,
    pub provider: Provider,
    pub content: Vec<u8>,
    /// Unix time in milliseconds.
    pub dispatch_time: i64,
}

impl Event {
    pub fn new(
        service_name: &str,
        kind: EventKind,
        priority: Priority,
        provider: Provider,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service_name: service_name.to_uppercase(),
            kind,
            priority,
            provider,
            content,
            dispatch_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_normalizes_names() {
        let event = Event::new(
            "category",
            EventKind::Domain,
            Priority::Mid,
            Provider::new("kafka"),
            b"{}".to_vec(),
        );
        assert_eq!(event.service_name, "CATEGORY");
        assert_eq!(event.provider.as_str(), "KAFKA");
        assert!(event.dispatch_time > 0);
        assert!(!event.id.is_empty());
    }

    #[test]
    fn priority_orders_low_to_high() {
        assert!(Priority::Low < Priority::High);
        assert_eq!(Priority::parse("mid"), Some(Priority::Mid));
        assert_eq!(EventKind::parse("bogus"), None);
    }
}
