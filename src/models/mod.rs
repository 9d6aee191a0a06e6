//! Data models for the gitpress backend.
//!
//! These models are serialized in camelCase for the API and stored as rows or JSON columns in
//! the cache.

mod post;
mod project;
mod repo_id;
mod schema;
mod settings;

pub use post::*;
pub use project::*;
pub use repo_id::*;
pub use schema::*;
pub use settings::*;

/// Ordered frontmatter metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
