//! Title metadata lookup.
//!
//! Lookups go through an ordered [`ProviderChain`]; the first provider with
//! an answer wins, failures are logged and skipped, and a miss everywhere
//! falls back to the caller's own title. The bundled provider reads a local
//! TOML catalog and keeps it in an [`ExpiringCache`].

use crate::classify::ContentType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Parse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Canonical identity of what's on the disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub year: Option<u32>,
    pub kind: ContentType,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(
        &self,
        title: &str,
        is_series: bool,
        year: Option<u32>,
    ) -> Result<Option<MediaMetadata>, MetadataError>;
}

#[async_trait]
pub trait EpisodeTitleProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn episode_title(
        &self,
        series: &str,
        season: u32,
        episode: u32,
        year: Option<u32>,
    ) -> Result<Option<String>, MetadataError>;
}

/// Ordered list of providers.
#[derive(Clone, Default)]
pub struct ProviderChain {
    metadata: Vec<Arc<dyn MetadataProvider>>,
    episodes: Vec<Arc<dyn EpisodeTitleProvider>>,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field(
                "metadata",
                &self.metadata.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "episodes",
                &self.episodes.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata.push(provider);
        self
    }

    pub fn with_episode_provider(mut self, provider: Arc<dyn EpisodeTitleProvider>) -> Self {
        self.episodes.push(provider);
        self
    }

    /// Resolve `title`; a miss returns it unchanged.
    pub async fn lookup(&self, title: &str, is_series: bool, year: Option<u32>) -> MediaMetadata {
        for provider in &self.metadata {
            match provider.lookup(title, is_series, year).await {
                Ok(Some(found)) => {
                    info!(
                        "{} matched '{}' as '{}' ({:?})",
                        provider.name(),
                        title,
                        found.title,
                        found.year
                    );
                    return found;
                }
                Ok(None) => debug!("{} has no match for '{}'", provider.name(), title),
                Err(e) => warn!("Metadata provider {} failed: {}", provider.name(), e),
            }
        }

        MediaMetadata {
            title: title.to_string(),
            year,
            kind: if is_series {
                ContentType::Series
            } else {
                ContentType::Movie
            },
        }
    }

    pub async fn episode_title(
        &self,
        series: &str,
        season: u32,
        episode: u32,
        year: Option<u32>,
    ) -> Option<String> {
        for provider in &self.episodes {
            match provider.episode_title(series, season, episode, year).await {
                Ok(Some(name)) if !name.trim().is_empty() => return Some(name),
                Ok(_) => {}
                Err(e) => warn!("Episode provider {} failed: {}", provider.name(), e),
            }
        }
        None
    }
}

/// A single value that is reloaded once it is older than its TTL.
#[derive(Debug)]
pub struct ExpiringCache<T> {
    ttl: Duration,
    entry: Mutex<Option<(Instant, Arc<T>)>>,
}

impl<T> ExpiringCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached value if present and fresh, otherwise the result of `load`.
    ///
    /// A failed load leaves the cache empty.
    pub async fn get_or_try_load<F, Fut, E>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut entry = self.entry.lock().await;
        if let Some((loaded_at, value)) = entry.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(value));
            }
        }

        *entry = None;
        let value = Arc::new(load().await?);
        *entry = Some((Instant::now(), Arc::clone(&value)));
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

/// Parsed catalog file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub titles: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    pub year: Option<u32>,
    pub kind: Option<ContentType>,
    /// Disc names or query strings that resolve to this entry
    #[serde(default, rename = "match")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub episodes: Vec<CatalogEpisode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEpisode {
    pub season: u32,
    pub episode: u32,
    pub name: String,
}

/// Case-insensitive, underscores as spaces, whitespace collapsed.
fn normalize(s: &str) -> String {
    s.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl Catalog {
    pub fn parse(content: &str) -> Result<Self, MetadataError> {
        toml::from_str(content).map_err(|e| MetadataError::Parse(e.to_string()))
    }

    fn matching<'a>(
        &'a self,
        query: &str,
        kind: ContentType,
        year: Option<u32>,
    ) -> Option<&'a CatalogEntry> {
        let query = normalize(query);
        self.titles.iter().find(|entry| {
            let name_matches = normalize(&entry.title) == query
                || entry.aliases.iter().any(|alias| normalize(alias) == query);
            let kind_matches = entry.kind.map_or(true, |k| k == kind);
            let year_matches = match (year, entry.year) {
                (Some(wanted), Some(known)) => wanted == known,
                _ => true,
            };
            name_matches && kind_matches && year_matches
        })
    }

    pub fn lookup(&self, query: &str, is_series: bool, year: Option<u32>) -> Option<MediaMetadata> {
        let kind = if is_series {
            ContentType::Series
        } else {
            ContentType::Movie
        };
        self.matching(query, kind, year).map(|entry| MediaMetadata {
            title: entry.title.clone(),
            year: entry.year.or(year),
            kind,
        })
    }

    pub fn episode_title(
        &self,
        series: &str,
        season: u32,
        episode: u32,
        year: Option<u32>,
    ) -> Option<String> {
        self.matching(series, ContentType::Series, year)?
            .episodes
            .iter()
            .find(|e| e.season == season && e.episode == episode)
            .map(|e| e.name.clone())
    }
}

/// Provider backed by a TOML catalog on disk.
#[derive(Debug)]
pub struct LocalCatalogProvider {
    path: PathBuf,
    cache: ExpiringCache<Catalog>,
}

impl LocalCatalogProvider {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            cache: ExpiringCache::new(ttl),
        }
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, MetadataError> {
        self.cache
            .get_or_try_load(|| async {
                let content = tokio::fs::read_to_string(&self.path).await?;
                let catalog = Catalog::parse(&content)?;
                debug!(
                    "Loaded {} catalog entries from {}",
                    catalog.titles.len(),
                    self.path.display()
                );
                Ok::<_, MetadataError>(catalog)
            })
            .await
    }
}

#[async_trait]
impl MetadataProvider for LocalCatalogProvider {
    fn name(&self) -> &str {
        "local catalog"
    }

    async fn lookup(
        &self,
        title: &str,
        is_series: bool,
        year: Option<u32>,
    ) -> Result<Option<MediaMetadata>, MetadataError> {
        Ok(self.catalog().await?.lookup(title, is_series, year))
    }
}

#[async_trait]
impl EpisodeTitleProvider for LocalCatalogProvider {
    fn name(&self) -> &str {
        "local catalog"
    }

    async fn episode_title(
        &self,
        series: &str,
        season: u32,
        episode: u32,
        year: Option<u32>,
    ) -> Result<Option<String>, MetadataError> {
        Ok(self
            .catalog()
            .await?
            .episode_title(series, season, episode, year))
    }
}
