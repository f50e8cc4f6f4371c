use serde::{Deserialize, Serialize};

/// Service scope a binary object (or any service-scoped entity) belongs to.
///
/// Each scope carries a 4-digit discriminator that is prepended to root ids so
/// rows coming from different services never collide in shared tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    User,
    Author,
    Media,
}

impl Service {
    /// Every known scope, in discriminator order.
    pub const ALL: [Service; 3] = [Service::User, Service::Author, Service::Media];

    /// Parses a scope name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "user" => Some(Service::User),
            "author" => Some(Service::Author),
            "media" => Some(Service::Media),
            _ => None,
        }
    }

    /// Returns the lowercase scope name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::User => "user",
            Service::Author => "author",
            Service::Media => "media",
        }
    }

    /// Returns the 4-digit id discriminator of this scope.
    pub fn discriminator(&self) -> &'static str {
        match self {
            Service::User => "0001",
            Service::Author => "0002",
            Service::Media => "0003",
        }
    }

    /// Recovers the scope from a service-prefixed id.
    pub fn from_id(id: &EntityId) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| id.as_str().starts_with(s.discriminator()))
    }

    /// Discriminator for an arbitrary service name; unknown names map to `0000`.
    pub fn discriminator_for(name: &str) -> &'static str {
        Self::from_name(name)
            .map(|s| s.discriminator())
            .unwrap_or("0000")
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque identifier of an entity row.
///
/// Service-scoped entities store a prefixed id (`<discriminator><root id>`);
/// clients only ever see the root part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an id from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a service-prefixed id from a root id.
    pub fn prefixed(service: &str, root: &str) -> Self {
        Self(format!("{}{}", Service::discriminator_for(service), root))
    }

    /// Returns the root id, removing the discriminator of `service` if present.
    pub fn root_for(&self, service: &str) -> &str {
        self.0
            .strip_prefix(Service::discriminator_for(service))
            .unwrap_or(&self.0)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
