//! Source catalog
//!
//! Sources are read from a static file at the start of every run. Any format
//! the `config` crate understands works; TOML is the default:
//!
//! ```toml
//! [[sources]]
//! name = "Hacker News"
//! url = "https://news.ycombinator.com/rss"
//! category = "tech"
//! ```

use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

use crate::error::Result;
use crate::schemas::Source;

pub trait SourceCatalog: Send + Sync {
    /// Enabled sources, in file order
    fn load(&self) -> Result<Vec<Source>>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    sources: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    url: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_active() -> bool {
    true
}

/// Catalog backed by a config file
pub struct FileSourceCatalog {
    path: PathBuf,
}

impl FileSourceCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceCatalog for FileSourceCatalog {
    fn load(&self) -> Result<Vec<Source>> {
        let file: CatalogFile = config::Config::builder()
            .add_source(config::File::from(self.path.as_path()))
            .build()?
            .try_deserialize()?;

        let sources: Vec<Source> = file
            .sources
            .into_iter()
            .filter(|entry| entry.active)
            .map(|entry| Source::new(entry.name, entry.url, entry.category))
            .collect();

        info!(path = %self.path.display(), count = sources.len(), "Loaded sources");
        Ok(sources)
    }
}

/// Fixed in-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticSourceCatalog {
    sources: Vec<Source>,
}

impl StaticSourceCatalog {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }
}

impl SourceCatalog for StaticSourceCatalog {
    fn load(&self) -> Result<Vec<Source>> {
        Ok(self.sources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_filters_inactive_and_applies_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[[sources]]
name = "Hacker News"
url = "https://news.ycombinator.com/rss"
category = "tech"

[[sources]]
name = "AI/ML Weekly"
url = "https://example.com/ml.xml"

[[sources]]
name = "Retired Feed"
url = "https://example.com/old.xml"
active = false
"#
        )
        .unwrap();

        let sources = FileSourceCatalog::new(file.path()).load().unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_id, "hacker-news");
        assert_eq!(sources[0].category, "tech");
        assert_eq!(sources[1].source_id, "ai-ml-weekly");
        assert_eq!(sources[1].category, "general");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let catalog = FileSourceCatalog::new("/nonexistent/rss_sources.toml");
        assert!(catalog.load().is_err());
    }
}
