//! Pluggable match sources the orchestrator consults besides the places
//! store: search engines, search suggestions, extension keywords, remote
//! tabs, places keywords and the preloaded top sites list.
//!
//! Everything is a trait so hosts wire in their own backends; the no-op
//! implementations keep the engine usable (and testable) without any of
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────
// Search engines
// ─────────────────────────────────────────────────────────────────────────

/// A search engine resolved by alias, domain or default lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMatch {
    pub name: String,
    /// The alias this engine was resolved through, when any.
    pub alias: Option<String>,
    /// Domain of the engine's result pages, used to substitute the search
    /// token in relational queries and for engine-domain autofill.
    pub result_domain: String,
    /// The engine's landing page, completed by engine-domain autofill.
    pub search_url: String,
    pub icon_url: Option<String>,
}

/// A search-results URL decomposed back into engine and terms.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionParse {
    pub engine_name: String,
    pub terms: String,
}

pub trait SearchEngineProvider: Send + Sync {
    fn engine_by_alias(&self, alias: &str) -> Option<EngineMatch>;
    /// Engine whose result domain starts with the given token.
    fn engine_by_domain(&self, token: &str) -> Option<EngineMatch>;
    fn default_engine(&self) -> Option<EngineMatch>;
    /// Recognizes URLs that are themselves search result pages, so history
    /// entries can be restyled as searches.
    fn parse_submission_url(&self, _url: &str) -> Option<SubmissionParse> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Search suggestions
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub search_string: String,
    pub in_private_window: bool,
    pub max_historical: usize,
    pub max_remote: usize,
    pub user_context_id: i64,
}

/// Suggestions for one query: previously-typed searches first, then remote
/// completions.
#[derive(Debug, Clone, Default)]
pub struct SuggestionBatch {
    pub historical: Vec<String>,
    pub remote: Vec<String>,
}

impl SuggestionBatch {
    pub fn len(&self) -> usize {
        self.historical.len() + self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.historical.is_empty() && self.remote.is_empty()
    }
}

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn fetch(
        &self,
        request: SuggestionRequest,
        token: &CancellationToken,
    ) -> SuggestionBatch;

    /// Hosts the user explicitly allowed suggestion fetches for even when
    /// the input looks like a bare hostname.
    fn is_domain_whitelisted(&self, _host: &str) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Extension omnibox keywords
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSuggestion {
    pub content: String,
    pub description: String,
}

#[async_trait]
pub trait ExtensionSearchHandler: Send + Sync {
    fn is_keyword_registered(&self, keyword: &str) -> bool;
    fn description(&self, _keyword: &str) -> Option<String> {
        None
    }
    async fn suggestions(
        &self,
        keyword: &str,
        text: &str,
        token: &CancellationToken,
    ) -> Vec<ExtensionSuggestion>;
    fn has_active_input_session(&self) -> bool {
        false
    }
    /// Tells the active extension its input session ended without a pick.
    fn handle_input_cancelled(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────
// Remote tabs
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTab {
    pub url: String,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub device_name: String,
    pub last_used: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteTabsProvider: Send + Sync {
    /// Synced tabs from other devices matching the search tokens.
    async fn matches(&self, tokens: &[String], token: &CancellationToken) -> Vec<RemoteTab>;
}

// ─────────────────────────────────────────────────────────────────────────
// Places keywords
// ─────────────────────────────────────────────────────────────────────────

/// A user-defined keyword bookmark ("%s" templates in the URL).
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    pub url: String,
    pub post_data: Option<String>,
    pub host: String,
}

#[async_trait]
pub trait KeywordTable: Send + Sync {
    async fn fetch(&self, keyword: &str) -> Option<KeywordEntry>;
}

// ─────────────────────────────────────────────────────────────────────────
// Preloaded top sites
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreloadedSite {
    pub url: String,
    pub title: String,
}

impl PreloadedSite {
    fn host(&self) -> &str {
        let s = &self.url;
        let s = s.find("://").map_or(s.as_str(), |i| &s[i + 3..]);
        s.split('/').next().unwrap_or("")
    }
}

/// The completed value and target for one preloaded autofill hit.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadedAutofill {
    pub value: String,
    pub url: String,
    pub title: String,
}

/// In-memory list of shipped top sites, offered before the user has built
/// up local history. Populated once from bundled JSON.
#[derive(Default)]
pub struct PreloadedSiteStorage {
    sites: RwLock<Vec<PreloadedSite>>,
}

impl PreloadedSiteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: impl Into<String>, title: impl Into<String>) {
        self.sites.write().push(PreloadedSite {
            url: url.into(),
            title: title.into(),
        });
    }

    /// Loads sites from a JSON array of `[url, title]` pairs. Returns the
    /// number of sites loaded.
    pub fn populate_from_json(&self, json: &str) -> serde_json::Result<usize> {
        let pairs: Vec<(String, String)> = serde_json::from_str(json)?;
        let mut sites = self.sites.write();
        sites.clear();
        sites.extend(
            pairs
                .into_iter()
                .map(|(url, title)| PreloadedSite { url, title }),
        );
        Ok(sites.len())
    }

    pub fn is_empty(&self) -> bool {
        self.sites.read().is_empty()
    }

    /// Sites whose host starts with the search string, for the general
    /// result stage.
    pub fn matching_sites(&self, search_string: &str) -> Vec<PreloadedSite> {
        let lower = search_string.to_lowercase();
        self.sites
            .read()
            .iter()
            .filter(|site| host_matches(&site.host().to_lowercase(), &lower))
            .cloned()
            .collect()
    }

    /// The best autofill completion among the preloaded sites, when the
    /// typed prefix (if any) is compatible with the site's scheme.
    pub fn autofill_site(
        &self,
        search_string: &str,
        stripped_prefix: &str,
    ) -> Option<PreloadedAutofill> {
        if search_string.is_empty() {
            return None;
        }
        let lower = search_string.to_lowercase();
        let sites = self.sites.read();
        let site = sites.iter().find(|site| {
            host_matches(&site.host().to_lowercase(), &lower)
                && (stripped_prefix.is_empty()
                    || site.url.to_lowercase().starts_with(stripped_prefix))
        })?;
        let lower_url = site.url.to_lowercase();
        let idx = lower_url.find(&lower)?;
        Some(PreloadedAutofill {
            value: site.url[idx..].to_string(),
            url: site.url.clone(),
            title: site.title.clone(),
        })
    }
}

/// The typed string matches a site when the host, the host without its
/// `www.` prefix, or the host with one prepended starts with it.
fn host_matches(host: &str, typed: &str) -> bool {
    let bare = host.strip_prefix("www.").unwrap_or(host);
    host.starts_with(typed)
        || bare.starts_with(typed)
        || format!("www.{}", bare).starts_with(typed)
}

// ─────────────────────────────────────────────────────────────────────────
// No-op implementations and the provider bundle
// ─────────────────────────────────────────────────────────────────────────

pub struct NoopEngines;

impl SearchEngineProvider for NoopEngines {
    fn engine_by_alias(&self, _alias: &str) -> Option<EngineMatch> {
        None
    }
    fn engine_by_domain(&self, _token: &str) -> Option<EngineMatch> {
        None
    }
    fn default_engine(&self) -> Option<EngineMatch> {
        None
    }
}

pub struct NoopSuggestions;

#[async_trait]
impl SuggestionProvider for NoopSuggestions {
    async fn fetch(
        &self,
        _request: SuggestionRequest,
        _token: &CancellationToken,
    ) -> SuggestionBatch {
        SuggestionBatch::default()
    }
}

pub struct NoopExtensions;

#[async_trait]
impl ExtensionSearchHandler for NoopExtensions {
    fn is_keyword_registered(&self, _keyword: &str) -> bool {
        false
    }
    async fn suggestions(
        &self,
        _keyword: &str,
        _text: &str,
        _token: &CancellationToken,
    ) -> Vec<ExtensionSuggestion> {
        Vec::new()
    }
}

pub struct NoopRemoteTabs;

#[async_trait]
impl RemoteTabsProvider for NoopRemoteTabs {
    async fn matches(&self, _tokens: &[String], _token: &CancellationToken) -> Vec<RemoteTab> {
        Vec::new()
    }
}

pub struct NoopKeywords;

#[async_trait]
impl KeywordTable for NoopKeywords {
    async fn fetch(&self, _keyword: &str) -> Option<KeywordEntry> {
        None
    }
}

/// All the non-places sources a search consults, bundled for injection.
#[derive(Clone)]
pub struct Providers {
    pub engines: Arc<dyn SearchEngineProvider>,
    pub suggestions: Arc<dyn SuggestionProvider>,
    pub extensions: Arc<dyn ExtensionSearchHandler>,
    pub remote_tabs: Arc<dyn RemoteTabsProvider>,
    pub keywords: Arc<dyn KeywordTable>,
    pub preloaded: Arc<PreloadedSiteStorage>,
}

impl Default for Providers {
    fn default() -> Self {
        Providers {
            engines: Arc::new(NoopEngines),
            suggestions: Arc::new(NoopSuggestions),
            extensions: Arc::new(NoopExtensions),
            remote_tabs: Arc::new(NoopRemoteTabs),
            keywords: Arc::new(NoopKeywords),
            preloaded: Arc::new(PreloadedSiteStorage::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_from_json() {
        let storage = PreloadedSiteStorage::new();
        let n = storage
            .populate_from_json(
                r#"[["https://www.mozilla.org/", "Mozilla"],
                    ["https://example.com/", "Example"]]"#,
            )
            .unwrap();
        assert_eq!(n, 2);
        assert!(!storage.is_empty());
    }

    #[test]
    fn test_matching_sites_by_host_prefix() {
        let storage = PreloadedSiteStorage::new();
        storage.add("https://www.mozilla.org/", "Mozilla");
        storage.add("https://example.com/", "Example");

        // "moz" matches mozilla.org through the www-stripped host.
        assert_eq!(storage.matching_sites("moz").len(), 1);
        assert_eq!(storage.matching_sites("www.moz").len(), 1);
        assert_eq!(storage.matching_sites("example").len(), 1);
        assert!(storage.matching_sites("nothing").is_empty());
    }

    #[test]
    fn test_autofill_site_completes_from_match_position() {
        let storage = PreloadedSiteStorage::new();
        storage.add("https://www.mozilla.org/", "Mozilla");

        let hit = storage.autofill_site("mozil", "").unwrap();
        assert_eq!(hit.value, "mozilla.org/");
        assert_eq!(hit.url, "https://www.mozilla.org/");
    }

    #[test]
    fn test_autofill_site_respects_typed_prefix() {
        let storage = PreloadedSiteStorage::new();
        storage.add("https://mozilla.org/", "Mozilla");

        assert!(storage.autofill_site("mozil", "https://").is_some());
        // The site is https, so an http prefix must not autofill it.
        assert!(storage.autofill_site("mozil", "http://").is_none());
    }

    #[test]
    fn test_autofill_site_empty_search_never_fills() {
        let storage = PreloadedSiteStorage::new();
        storage.add("https://mozilla.org/", "Mozilla");
        assert!(storage.autofill_site("", "").is_none());
    }
}
