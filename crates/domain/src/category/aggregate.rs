use common::ValidationError;
use serde::{Deserialize, Serialize};

use super::Category;

/// Raw category input as it arrives from a transport boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAggregate {
    #[serde(default)]
    pub name: String,
}

impl CategoryAggregate {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Builds and validates a new category.
    pub fn into_category(self) -> Result<Category, ValidationError> {
        let category = Category::new(&self.name);
        common::Entity::validate(&category)?;
        Ok(category)
    }
}

/// Field deltas applied by an update. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default)]
    pub name: Option<String>,
}

impl CategoryPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Applies the deltas to a copy of `current` and validates the result.
    pub fn apply(&self, current: &Category) -> Result<Category, ValidationError> {
        let mut next = current.clone();
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => next.rename(name),
            _ => common::Entity::touch(&mut next),
        }
        common::Entity::validate(&next)?;
        Ok(next)
    }
}
