//! Storage-facing traits and row types.
//!
//! The search orchestrator talks to the places store through these traits so
//! tests can substitute in-memory fakes and so the sqlite plumbing stays in
//! one module. Every query takes a cancellation token; implementations are
//! expected to abandon work promptly when it fires.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::SearchBehavior;
use crate::prefs::MatchBehavior;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("query interrupted")]
    Interrupted,
}

pub type IndexResult<T> = Result<T, IndexError>;

/// A visited or bookmarked page as returned by the filtered, adaptive and
/// switch-to-tab queries.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRow {
    pub url: String,
    pub title: Option<String>,
    pub bookmarked: bool,
    pub bookmark_title: Option<String>,
    /// Comma separated tag list, already concatenated by the query.
    pub tags: Option<String>,
    pub open_count: i64,
    /// Absent for open pages not yet in the places store.
    pub place_id: Option<i64>,
    pub frecency: Option<f64>,
}

/// An origin eligible for autofill, with the exact value to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginRow {
    /// What gets autofilled into the input, e.g. "mozilla.org/".
    pub autofilled_value: String,
    pub url: String,
    pub frecency: f64,
}

/// A full URL eligible for autofill when the input reaches into a path.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRow {
    pub url: String,
    /// The URL with scheme and userinfo stripped, matching what the user
    /// typed.
    pub stripped_url: String,
    pub frecency: f64,
}

/// Parameters shared by the token-matching queries.
#[derive(Debug, Clone)]
pub struct FilteredQuery {
    pub search_string: String,
    pub match_behavior: MatchBehavior,
    pub behavior: SearchBehavior,
    pub user_context_id: i64,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct OriginQuery {
    /// Typed origin, lowercased, trailing slash removed.
    pub search_string: String,
    /// Typed scheme prefix, when the user typed one ("https://").
    pub prefix: Option<String>,
    /// Restrict candidates to bookmarked origins.
    pub bookmarked_only: bool,
    pub stddev_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct UrlQuery {
    /// Reversed host of the typed URL ("moc.elpmaxe.").
    pub rev_host: String,
    /// Host plus typed path remainder, no scheme or userinfo.
    pub stripped_url: String,
    pub prefix: Option<String>,
    pub bookmarked_only: bool,
    pub stddev_multiplier: f64,
}

/// Frecency-ordered lookups against the places store.
#[async_trait]
pub trait FrecencyIndex: Send + Sync {
    /// Pages matching every search token, best frecency first.
    async fn filtered(
        &self,
        query: FilteredQuery,
        token: &CancellationToken,
    ) -> IndexResult<Vec<PlaceRow>>;

    /// Open pages not yet in the places store.
    async fn switch_to_tab(
        &self,
        query: FilteredQuery,
        token: &CancellationToken,
    ) -> IndexResult<Vec<PlaceRow>>;

    /// Pages previously picked for a related input, ranked by use count.
    async fn adaptive(
        &self,
        query: FilteredQuery,
        token: &CancellationToken,
    ) -> IndexResult<Vec<PlaceRow>>;

    /// Best origin starting with the typed string, if any clears the
    /// frecency threshold.
    async fn origin_autofill(
        &self,
        query: OriginQuery,
        token: &CancellationToken,
    ) -> IndexResult<Option<OriginRow>>;

    /// Best URL starting with the typed string, if any clears the frecency
    /// threshold.
    async fn url_autofill(
        &self,
        query: UrlQuery,
        token: &CancellationToken,
    ) -> IndexResult<Option<UrlRow>>;
}

/// Tracks which pages are currently open so the filtered and switch-to-tab
/// queries can offer tab switches. Registrations arriving before the store
/// is ready are queued and flushed on first use.
#[async_trait]
pub trait SwitchToTabRegistry: Send + Sync {
    async fn register_open_page(&self, url: &str, user_context_id: i64) -> IndexResult<()>;
    async fn unregister_open_page(&self, url: &str, user_context_id: i64) -> IndexResult<()>;
}
