//! Taxonomy categories.

mod aggregate;
mod entity;

pub use aggregate::{CategoryAggregate, CategoryPatch};
pub use entity::{Category, title_case};
