//! Binary object descriptor.

use chrono::{DateTime, Utc};
use common::{Entity, EntityId, Lifecycle, Service, ValidationError};
use serde::{Deserialize, Serialize};

use super::rules;

/// Where public blob urls point to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// CDN or bucket domain, e.g. `cdn.example.com`.
    pub domain: String,
    /// Path prefix inside the domain.
    pub path: String,
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self {
            domain: "cdn.example.com".to_string(),
            path: "blobs".to_string(),
        }
    }
}

impl StorageLocation {
    pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            path: path.into(),
        }
    }

    /// Builds the public url of an object.
    pub fn url_for(&self, service: &str, name: &str) -> String {
        format!("https://{}/{}/{}/{}", self.domain, self.path, service, name)
    }
}

/// Descriptor of a binary object. Payload bytes travel separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    /// Service-prefixed id.
    pub id: EntityId,
    pub service: String,
    /// `<root id>.<extension>`, also the object store key.
    pub name: String,
    pub size: i64,
    pub blob_type: String,
    pub extension: String,
    pub url: String,
    #[serde(default = "active_default")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn active_default() -> bool {
    true
}

impl Blob {
    /// Builds a blob for `root_id`, prefixing the id with the service
    /// discriminator and deriving name and url.
    pub fn new(
        root_id: &str,
        service: &str,
        blob_type: &str,
        extension: &str,
        size: i64,
        location: &StorageLocation,
    ) -> Self {
        let service = service.to_lowercase();
        let extension = extension.to_lowercase();
        let name = format!("{root_id}.{extension}");
        let now = Utc::now();

        Self {
            id: EntityId::prefixed(&service, root_id),
            url: location.url_for(&service, &name),
            service,
            name,
            size,
            blob_type: blob_type.to_lowercase(),
            extension,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the id as seen by clients.
    pub fn root_id(&self) -> &str {
        self.id.root_for(&self.service)
    }

    /// Returns the parsed service scope, if known.
    pub fn scope(&self) -> Option<Service> {
        Service::from_name(&self.service)
    }
}

impl Entity for Blob {
    fn aggregate_type() -> &'static str {
        "blob"
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn validate(&self) -> Result<(), ValidationError> {
        rules::validate_blob(self)
    }

    fn event_name(lifecycle: Lifecycle) -> String {
        match lifecycle {
            Lifecycle::Created | Lifecycle::Updated => super::BLOB_UPLOADED.to_string(),
            _ => super::BLOB_REMOVED.to_string(),
        }
    }

    /// Blob topics are scoped by the owning service, e.g. `MEDIA_BLOB_UPLOADED`.
    fn topic(lifecycle: Lifecycle, id: &EntityId) -> String {
        match Service::from_id(id) {
            Some(service) => format!(
                "{}_{}",
                service.as_str().to_uppercase(),
                Self::event_name(lifecycle)
            ),
            None => Self::event_name(lifecycle),
        }
    }

    /// Consumers only need the public url.
    fn event_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&[&self.url])
    }
}
