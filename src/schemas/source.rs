//! Source Schema

use serde::{Deserialize, Serialize};

/// A configured RSS/Atom feed, read-only for the duration of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub source_id: String,
    pub name: String,
    pub url: String,
    pub category: String,
}

impl Source {
    /// Builds a source, deriving its id from the display name
    pub fn new(name: impl Into<String>, url: impl Into<String>, category: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source_id: source_id_from_name(&name),
            name,
            url: url.into(),
            category: category.into(),
        }
    }
}

/// "Hacker News / Best" → "hacker-news---best"
pub fn source_id_from_name(name: &str) -> String {
    name.to_lowercase().replace([' ', '/'], "-")
}
