//! Taxonomy category.

use chrono::{DateTime, Utc};
use common::{Entity, EntityId, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NAME_MAX: usize = 255;
const EXTERNAL_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Creates an active category with a fresh 16 character id.
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(EXTERNAL_ID_LEN);

        Self {
            id: EntityId::new(id),
            name: title_case(name),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Renames the category, keeping the canonical title case.
    pub fn rename(&mut self, name: &str) {
        self.name = title_case(name);
        self.touch();
    }
}

/// Upper-cases the first letter of every whitespace separated word.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.trim().chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl Entity for Category {
    fn aggregate_type() -> &'static str {
        "category"
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.name.to_lowercase())
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
        if self.id.is_blank() {
            return Err(ValidationError::required("id"));
        }
        let len = self.name.chars().count();
        if len == 0 {
            return Err(ValidationError::required("name"));
        }
        if len > NAME_MAX {
            return Err(ValidationError::range("name", "1", NAME_MAX.to_string()));
        }
        Ok(())
    }
}
