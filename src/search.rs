//! One autocomplete search: the heuristic cascade, the concurrent source
//! stages and the incremental notification machinery.
//!
//! A search runs until it finishes, is cancelled by a newer search, or the
//! consumer stops it. Source stages run in a fixed order so the result
//! layout is stable; slow providers are raced against timeouts so a hung
//! backend can never wedge the address bar.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::fixup::{
    encode_query_component, fixup_uri_info, is_single_word_host, looks_like_origin,
    looks_like_url, reverse_host, scheme_expects_host, unescape_for_display,
};
use crate::index::{FilteredQuery, FrecencyIndex, IndexError, OriginQuery, PlaceRow, UrlQuery};
use crate::interface::{ResultBuffer, SearchObserver, SearchResultCode};
use crate::models::{
    icon_for_url, Action, CandidateMatch, MatchType, SearchBehavior, SearchInput,
    FRECENCY_DEFAULT, FRECENCY_INFINITE,
};
use crate::prefs::{MatchBehavior, PrefStore, MAX_EXTENSION_MATCHES};
use crate::providers::{Providers, SuggestionRequest};
use crate::ranking::MatchSink;

/// Separator between a title and its tag list in the comment column.
pub const TITLE_TAGS_SEPARATOR: &str = " \u{2013} ";

/// Notifications are coalesced for this long, except for heuristic matches.
const NOTIFY_DELAY_MS: u64 = 16;
/// After this many consecutive coalesced notifications one is forced out.
const MAX_NOTIFY_DELAYS: usize = 3;

const EXTENSION_TIMEOUT_MS: u64 = 3000;
/// Stale extension rows are dropped this long into a new search even if the
/// extension has not answered yet.
const EXTENSION_STALE_CLEANUP_MS: u64 = 100;
const SUGGESTION_TIMEOUT_MS: u64 = 3000;

/// Remote tabs used in the last 72 hours surface immediately; older ones
/// only fill leftover slots.
const RECENT_REMOTE_TAB_THRESHOLD_MS: i64 = 259_200_000;

/// Input prefixes for which suggestion fetches are suppressed, so partially
/// typed URLs don't leak to the network.
const DISALLOWED_URLLIKE_PREFIXES: [&str; 3] = ["http", "https", "ftp"];

pub struct Search {
    input: SearchInput,
    prefs: Arc<PrefStore>,
    index: Arc<dyn FrecencyIndex>,
    providers: Providers,
    observer: Arc<dyn SearchObserver>,
    buffer: Arc<ResultBuffer>,
    sink: Mutex<MatchSink>,
    pending: AtomicBool,
    token: CancellationToken,
    match_behavior: Mutex<MatchBehavior>,
    /// Replaces the first search token in relational queries after an
    /// engine alias or places keyword resolved it to a host.
    keyword_substitute: Mutex<Option<String>>,
    adding_heuristic: AtomicBool,
    extension_count: AtomicUsize,
    adaptive_count: AtomicUsize,
    extra_adaptive: Mutex<Vec<CandidateMatch>>,
    extra_remote_tabs: Mutex<Vec<CandidateMatch>>,
    notify_delays: AtomicUsize,
    notify_timer: Mutex<Option<AbortOnDropHandle<()>>>,
    prohibit_suggestions: AtomicBool,
    /// Set when the suggestion backend came back nearly empty, so the next
    /// longer search can skip the fetch.
    last_low_results: Mutex<Option<String>>,
    max_rich_results: usize,
}

impl Search {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input: SearchInput,
        prefs: Arc<PrefStore>,
        index: Arc<dyn FrecencyIndex>,
        providers: Providers,
        observer: Arc<dyn SearchObserver>,
        buffer: Arc<ResultBuffer>,
        previous_types: Vec<MatchType>,
        prohibit_suggestions: bool,
    ) -> Arc<Search> {
        let max_rich_results = prefs.get_int("maxRichResults").max(1) as usize;
        let sink = MatchSink::new(
            Arc::clone(&buffer),
            previous_types,
            prefs.match_buckets(),
            prefs.match_buckets_search(),
            max_rich_results,
        );
        let match_behavior = prefs.match_behavior();
        Arc::new(Search {
            input,
            prefs,
            index,
            providers,
            observer,
            buffer,
            sink: Mutex::new(sink),
            pending: AtomicBool::new(true),
            token: CancellationToken::new(),
            match_behavior: Mutex::new(match_behavior),
            keyword_substitute: Mutex::new(None),
            adding_heuristic: AtomicBool::new(false),
            extension_count: AtomicUsize::new(0),
            adaptive_count: AtomicUsize::new(0),
            extra_adaptive: Mutex::new(Vec::new()),
            extra_remote_tabs: Mutex::new(Vec::new()),
            notify_delays: AtomicUsize::new(0),
            notify_timer: Mutex::new(None),
            prohibit_suggestions: AtomicBool::new(prohibit_suggestions),
            last_low_results: Mutex::new(None),
            max_rich_results,
        })
    }

    pub(crate) fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn buffer(&self) -> &Arc<ResultBuffer> {
        &self.buffer
    }

    pub(crate) fn input(&self) -> &SearchInput {
        &self.input
    }

    pub(crate) fn take_last_low_results(&self) -> Option<String> {
        self.last_low_results.lock().take()
    }

    /// Cancels the search without a final notification.
    pub(crate) fn stop(&self) {
        *self.notify_timer.lock() = None;
        self.token.cancel();
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Completes the search exactly once, optionally sending the final
    /// non-ongoing notification.
    pub(crate) fn finish(&self, notify: bool) {
        if !self.pending.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.notify_timer.lock() = None;
        self.token.cancel();
        if notify {
            self.clean_up_restrict_non_current();
            self.do_notify(false);
        }
    }

    // ═════════════════════════════════════════════════════════════════════
    // Main flow
    // ═════════════════════════════════════════════════════════════════════

    pub(crate) async fn execute(self: Arc<Self>) {
        let has_tokens = !self.input.tokens.is_empty();

        self.adding_heuristic.store(true, Ordering::SeqCst);
        let heuristic_added = self.match_first_heuristic().await;
        self.adding_heuristic.store(false, Ordering::SeqCst);
        self.clean_up_non_current(MatchType::Heuristic, true);
        if !self.pending() {
            return;
        }

        // Give the UI a moment with just the heuristic match before slower
        // sources start mutating the list.
        if heuristic_added {
            let delay = self.prefs.get_int("delay").max(0) as u64;
            if !self.sleep_ms(delay).await {
                return;
            }
        }

        let token0 = self
            .input
            .trimmed_original
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        let extension_task = if !token0.is_empty()
            && self.providers.extensions.is_keyword_registered(&token0)
            && self.input.trimmed_original.len() > token0.len()
        {
            let this = Arc::clone(&self);
            Some(tokio::spawn(async move {
                this.match_extension_suggestions(token0).await;
            }))
        } else {
            if self.providers.extensions.has_active_input_session() {
                self.providers.extensions.handle_input_cancelled();
            }
            None
        };

        let suggestion_task = if self.input.options.enable_actions && has_tokens {
            let this = Arc::clone(&self);
            Some(tokio::spawn(async move {
                this.match_search_suggestions().await;
            }))
        } else {
            None
        };

        // A search-restricted query needs nothing from the places store.
        if self.input.behavior.contains(SearchBehavior::RESTRICT)
            && self.input.has_behavior(SearchBehavior::SEARCHES)
        {
            if let Some(task) = suggestion_task {
                let _ = task.await;
            }
            self.clean_up_non_current(MatchType::Suggestion, true);
            self.finish(true);
            if let Some(task) = extension_task {
                task.abort();
            }
            return;
        }

        self.match_adaptive_history().await;
        if self.pending()
            && self.input.options.enable_actions
            && self.input.has_behavior(SearchBehavior::OPENPAGE)
        {
            self.match_remote_tabs().await;
            self.match_open_pages().await;
        }
        if self.pending() {
            self.match_filtered_places().await;
        }
        self.drain_extra_rows();
        self.clean_up_non_current(MatchType::General, true);

        // Boundary matching may leave the list under-filled; retry matching
        // anywhere in the text.
        let under_filled = {
            let sink = self.sink.lock();
            sink.count(MatchType::General) + sink.count(MatchType::Heuristic)
                < self.max_rich_results
        };
        if self.pending()
            && under_filled
            && *self.match_behavior.lock() == MatchBehavior::BoundaryAnywhere
        {
            *self.match_behavior.lock() = MatchBehavior::Anywhere;
            self.match_adaptive_history().await;
            self.match_filtered_places().await;
        }

        self.match_preloaded_sites();

        if let Some(task) = suggestion_task {
            let _ = task.await;
            self.clean_up_non_current(MatchType::Suggestion, true);
        }
        if let Some(task) = extension_task {
            let _ = task.await;
        }
    }

    // ═════════════════════════════════════════════════════════════════════
    // Heuristic cascade
    // ═════════════════════════════════════════════════════════════════════

    /// Tries each heuristic source in priority order; the first hit becomes
    /// the top match. Returns whether one was added.
    async fn match_first_heuristic(self: &Arc<Self>) -> bool {
        let has_tokens = !self.input.tokens.is_empty();

        if has_tokens && self.match_extension_heuristic() {
            return true;
        }
        if self.input.options.enable_actions && has_tokens && self.match_search_engine_alias() {
            return true;
        }
        if has_tokens && self.match_places_keyword().await {
            return true;
        }
        if self.should_autofill() {
            if self.match_known_url().await {
                return true;
            }
            if self.match_search_engine_domain_autofill() {
                return true;
            }
            if self.match_preloaded_site_autofill() {
                return true;
            }
        }
        if self.pending() && has_tokens && self.match_unknown_url() {
            return true;
        }
        if self.pending()
            && self.input.options.enable_actions
            && !self.input.trimmed_original.is_empty()
            && self.match_default_engine()
        {
            return true;
        }
        false
    }

    fn match_extension_heuristic(self: &Arc<Self>) -> bool {
        let Some(keyword) = self.input.trimmed_original.split_whitespace().next() else {
            return false;
        };
        if !self.providers.extensions.is_keyword_registered(keyword)
            || self.input.trimmed_original.len() <= keyword.len()
        {
            return false;
        }
        let mut m = CandidateMatch::with_action(
            Action::ExtensionMatch {
                content: self.input.trimmed_original.clone(),
                keyword: keyword.to_string(),
            },
            FRECENCY_INFINITE,
        );
        m.comment = self
            .providers
            .extensions
            .description(keyword)
            .unwrap_or_default();
        m.style = "action extension".into();
        self.add_candidate(m)
    }

    fn match_search_engine_alias(self: &Arc<Self>) -> bool {
        let Some(alias) = self.input.trimmed_original.split_whitespace().next() else {
            return false;
        };
        let Some(engine) = self.providers.engines.engine_by_alias(alias) else {
            return false;
        };
        let query = self.input.trimmed_original[alias.len()..]
            .trim_start()
            .to_string();
        *self.keyword_substitute.lock() = Some(engine.result_domain.clone());

        let mut m = CandidateMatch::with_action(
            Action::SearchEngine {
                engine: engine.name.clone(),
                query,
                suggestion: None,
                alias: Some(alias.to_string()),
                input: self.input.original.clone(),
            },
            FRECENCY_INFINITE,
        );
        m.comment = engine.name;
        m.icon = engine.icon_url.unwrap_or_default();
        m.style = "action searchengine".into();
        self.add_candidate(m)
    }

    async fn match_places_keyword(self: &Arc<Self>) -> bool {
        let keyword = format!("{}{}", self.input.stripped_prefix, self.input.tokens[0]);
        let Some(entry) = self.providers.keywords.fetch(&keyword).await else {
            return false;
        };
        let terms = self.input.tokens[1..].join(" ");
        if entry.url.contains("%s") && terms.is_empty() {
            // The keyword needs terms to substitute; let the other
            // heuristics have a go.
            return false;
        }
        let url = entry.url.replace("%s", &encode_query_component(&terms));
        *self.keyword_substitute.lock() = Some(entry.host.clone());

        let mut m = CandidateMatch::with_action(
            Action::Keyword {
                url,
                input: self.input.original.clone(),
                post_data: entry.post_data,
            },
            FRECENCY_INFINITE,
        );
        m.comment = entry.host;
        m.style = "action keyword".into();
        self.add_candidate(m)
    }

    async fn match_known_url(self: &Arc<Self>) -> bool {
        let bookmarked_only = self.input.has_behavior(SearchBehavior::BOOKMARK)
            && !self.input.has_behavior(SearchBehavior::HISTORY);
        let stddev_multiplier = self.prefs.get_float("autoFill.stddevMultiplier");
        let prefix = if self.input.stripped_prefix.is_empty() {
            None
        } else {
            Some(self.input.stripped_prefix.clone())
        };

        if looks_like_origin(&self.input.search_string) {
            let search_string = self
                .input
                .search_string
                .trim_end_matches('/')
                .to_lowercase();
            let query = OriginQuery {
                search_string,
                prefix,
                bookmarked_only,
                stddev_multiplier,
            };
            let row = match self.index.origin_autofill(query, &self.token).await {
                Ok(row) => row,
                Err(IndexError::Interrupted) => return false,
                Err(e) => {
                    warn!(error = %e, "origin autofill query failed");
                    return false;
                }
            };
            let Some(row) = row else { return false };
            let mut m = CandidateMatch::new(
                format!("{}{}", self.typed_prefix(), row.autofilled_value),
                row.frecency,
            );
            m.comment = row.url.clone();
            m.icon = icon_for_url(&row.url);
            m.final_complete_value = row.url;
            m.style = "autofill".into();
            let added = self.add_candidate(m);
            if added {
                self.buffer.set_default_index(Some(0));
            }
            return added;
        }

        // The input reaches into a path, so complete against full URLs of
        // the typed host.
        let s = &self.input.search_string;
        let host_end = s
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(s.len());
        let host = s[..host_end].to_lowercase();
        if host.is_empty() {
            return false;
        }
        let stripped_url = format!("{}{}", host, &s[host_end..]);
        let query = UrlQuery {
            rev_host: reverse_host(&host),
            stripped_url: stripped_url.clone(),
            prefix,
            bookmarked_only,
            stddev_multiplier,
        };
        let row = match self.index.url_autofill(query, &self.token).await {
            Ok(row) => row,
            Err(IndexError::Interrupted) => return false,
            Err(e) => {
                warn!(error = %e, "url autofill query failed");
                return false;
            }
        };
        let Some(row) = row else { return false };
        if !row.stripped_url.starts_with(&stripped_url) {
            return false;
        }
        let remainder = &row.stripped_url[stripped_url.len()..];
        let mut m = CandidateMatch::new(
            format!("{}{}{}", self.typed_prefix(), s, remainder),
            row.frecency,
        );
        m.comment = row.url.clone();
        m.icon = icon_for_url(&row.url);
        m.final_complete_value = row.url;
        m.style = "autofill".into();
        let added = self.add_candidate(m);
        if added {
            self.buffer.set_default_index(Some(0));
        }
        added
    }

    fn match_search_engine_domain_autofill(self: &Arc<Self>) -> bool {
        if !self.prefs.get_bool("autoFill.searchEngines")
            || !looks_like_origin(&self.input.search_string)
        {
            return false;
        }
        let token = self
            .input
            .search_string
            .trim_end_matches('/')
            .to_lowercase();
        let Some(engine) = self.providers.engines.engine_by_domain(&token) else {
            return false;
        };
        if !self.input.stripped_prefix.is_empty()
            && !engine.search_url.starts_with(&self.input.stripped_prefix)
        {
            return false;
        }
        let haystack = format!("{}/", engine.result_domain.to_lowercase());
        let needle = self.input.search_string.to_lowercase();
        let Some(idx) = haystack.find(&needle) else {
            return false;
        };
        let mut m = CandidateMatch::new(
            format!("{}{}", self.typed_prefix(), &haystack[idx..]),
            FRECENCY_INFINITE,
        );
        m.comment = engine.name;
        m.icon = engine.icon_url.unwrap_or_default();
        m.final_complete_value = engine.search_url;
        m.style = "priority-search".into();
        let added = self.add_candidate(m);
        if added {
            self.buffer.set_default_index(Some(0));
        }
        added
    }

    fn match_preloaded_site_autofill(self: &Arc<Self>) -> bool {
        if !self.prefs.get_bool("usepreloadedtopurls.enabled") {
            return false;
        }
        let Some(hit) = self
            .providers
            .preloaded
            .autofill_site(&self.input.search_string, &self.input.stripped_prefix)
        else {
            return false;
        };
        let mut m = CandidateMatch::new(
            format!("{}{}", self.typed_prefix(), hit.value),
            FRECENCY_INFINITE,
        );
        m.comment = hit.title;
        m.icon = icon_for_url(&hit.url);
        m.final_complete_value = hit.url;
        m.style = "autofill preloaded-top-site".into();
        let added = self.add_candidate(m);
        if added {
            self.buffer.set_default_index(Some(0));
        }
        added
    }

    fn match_unknown_url(self: &Arc<Self>) -> bool {
        if self.input.search_string.is_empty() {
            return false;
        }
        let keyword_enabled = self.prefs.get_bool("keyword.enabled");
        let text = self.input.trimmed_original.clone();

        let info = match fixup_uri_info(&text, true, true, keyword_enabled) {
            Ok(info) => info,
            Err(_) => {
                if keyword_enabled {
                    return false;
                }
                // Keyword search is off, so even unusable input is offered
                // as a literal visit.
                let mut m = CandidateMatch::with_action(
                    Action::VisitUrl {
                        url: text.clone(),
                        input: self.input.original.clone(),
                    },
                    FRECENCY_INFINITE,
                );
                m.comment = text;
                m.style = "action visiturl".into();
                return self.add_candidate(m);
            }
        };
        if info.keyword_as_sent {
            return false;
        }
        let Some(uri) = info.fixed_uri else {
            return false;
        };
        if scheme_expects_host(uri.scheme()) && uri.host_str().is_none() {
            return false;
        }

        let display = unescape_for_display(uri.as_str());
        let mut m = CandidateMatch::with_action(
            Action::VisitUrl {
                url: uri.to_string(),
                input: self.input.original.clone(),
            },
            FRECENCY_INFINITE,
        );
        m.comment = display;
        m.icon = icon_for_url(uri.as_str());
        m.style = "action visiturl".into();
        let added = self.add_candidate(m);

        // Ambiguous single-word-ish input also gets a search fallback row,
        // below the heuristic.
        if added
            && keyword_enabled
            && self.input.options.enable_actions
            && !looks_like_url(&text, true)
        {
            self.adding_heuristic.store(false, Ordering::SeqCst);
            self.add_default_engine_match(MatchType::General);
            self.adding_heuristic.store(true, Ordering::SeqCst);
        }
        added
    }

    fn match_default_engine(self: &Arc<Self>) -> bool {
        self.add_default_engine_match(MatchType::Heuristic)
    }

    fn add_default_engine_match(self: &Arc<Self>, _intended: MatchType) -> bool {
        let Some(engine) = self.providers.engines.default_engine() else {
            return false;
        };
        let mut m = CandidateMatch::with_action(
            Action::SearchEngine {
                engine: engine.name.clone(),
                query: self.input.search_string.clone(),
                suggestion: None,
                alias: None,
                input: self.input.original.clone(),
            },
            FRECENCY_DEFAULT,
        );
        m.comment = engine.name;
        m.icon = engine.icon_url.unwrap_or_default();
        m.style = "action searchengine".into();
        self.add_candidate(m)
    }

    fn should_autofill(&self) -> bool {
        self.prefs.get_bool("autoFill")
            && self.input.tokens.len() == 1
            && !self.input.options.prohibit_autofill
            && (self.input.has_behavior(SearchBehavior::HISTORY)
                || self.input.has_behavior(SearchBehavior::BOOKMARK))
            && !self.input.behavior.contains(SearchBehavior::TITLE)
            && !self.input.behavior.contains(SearchBehavior::TAG)
            && !self.input.original.chars().any(char::is_whitespace)
            && !self.input.search_string.is_empty()
    }

    /// The scheme prefix exactly as typed, to re-prepend to autofill values.
    fn typed_prefix(&self) -> &str {
        &self.input.trimmed_original[..self.input.stripped_prefix.len()]
    }

    // ═════════════════════════════════════════════════════════════════════
    // Source stages
    // ═════════════════════════════════════════════════════════════════════

    /// Pages previously picked for related input. Only the first quarter of
    /// the visible slots go in directly; the rest wait for leftover space.
    async fn match_adaptive_history(self: &Arc<Self>) {
        let query = FilteredQuery {
            search_string: self.input.search_string.to_lowercase(),
            match_behavior: *self.match_behavior.lock(),
            behavior: self.input.behavior,
            user_context_id: self.input.options.user_context_id,
            max_results: self.max_rich_results,
        };
        let rows = match self.index.adaptive(query, &self.token).await {
            Ok(rows) => rows,
            Err(IndexError::Interrupted) => return,
            Err(e) => {
                warn!(error = %e, "adaptive query failed");
                return;
            }
        };
        let cap = (self.max_rich_results + 3) / 4;
        for row in &rows {
            let m = self.candidate_from_row(row);
            let seen = self.adaptive_count.fetch_add(1, Ordering::SeqCst) + 1;
            if seen <= cap {
                self.add_candidate(m);
            } else {
                self.extra_adaptive.lock().push(m);
            }
            if !self.pending() {
                return;
            }
        }
    }

    async fn match_remote_tabs(self: &Arc<Self>) {
        let tabs = self
            .providers
            .remote_tabs
            .matches(&self.input.tokens, &self.token)
            .await;
        let recent_cutoff =
            Utc::now() - chrono::Duration::milliseconds(RECENT_REMOTE_TAB_THRESHOLD_MS);
        for tab in tabs {
            let mut m = CandidateMatch::with_action(
                Action::RemoteTab {
                    url: tab.url.clone(),
                    device: tab.device_name.clone(),
                },
                FRECENCY_DEFAULT + 1.0,
            );
            m.comment = tab.title.unwrap_or_else(|| tab.url.clone());
            m.icon = tab.icon.unwrap_or_else(|| icon_for_url(&tab.url));
            m.style = "action remotetab".into();
            if tab.last_used > recent_cutoff {
                self.add_candidate(m);
            } else {
                self.extra_remote_tabs.lock().push(m);
            }
            if !self.pending() {
                return;
            }
        }
    }

    /// Open pages the places store knows nothing about yet.
    async fn match_open_pages(self: &Arc<Self>) {
        let query = FilteredQuery {
            search_string: self.keyword_substituted_search_string(),
            match_behavior: *self.match_behavior.lock(),
            behavior: self.input.behavior,
            user_context_id: self.input.options.user_context_id,
            max_results: self.max_rich_results,
        };
        let rows = match self.index.switch_to_tab(query, &self.token).await {
            Ok(rows) => rows,
            Err(IndexError::Interrupted) => return,
            Err(e) => {
                warn!(error = %e, "switch-to-tab query failed");
                return;
            }
        };
        for row in &rows {
            self.add_candidate(self.candidate_from_row(row));
            if !self.pending() {
                return;
            }
        }
    }

    async fn match_filtered_places(self: &Arc<Self>) {
        let query = FilteredQuery {
            search_string: self.keyword_substituted_search_string(),
            match_behavior: *self.match_behavior.lock(),
            behavior: self.input.behavior,
            user_context_id: self.input.options.user_context_id,
            max_results: self.max_rich_results,
        };
        let rows = match self.index.filtered(query, &self.token).await {
            Ok(rows) => rows,
            Err(IndexError::Interrupted) => return,
            Err(e) => {
                warn!(error = %e, "filtered query failed");
                return;
            }
        };
        for row in &rows {
            self.add_candidate(self.candidate_from_row(row));
            if !self.pending() {
                return;
            }
        }
    }

    /// Queued adaptive and remote-tab rows fill whatever slots the primary
    /// stages left open, in that order.
    fn drain_extra_rows(self: &Arc<Self>) {
        loop {
            if self.sink.lock().current_match_count() >= self.max_rich_results {
                return;
            }
            let next = {
                let mut adaptive = self.extra_adaptive.lock();
                if adaptive.is_empty() {
                    let mut remote = self.extra_remote_tabs.lock();
                    if remote.is_empty() {
                        return;
                    }
                    remote.remove(0)
                } else {
                    adaptive.remove(0)
                }
            };
            self.add_candidate(next);
        }
    }

    fn match_preloaded_sites(self: &Arc<Self>) {
        if !self.prefs.get_bool("usepreloadedtopurls.enabled")
            || self.input.search_string.is_empty()
        {
            return;
        }
        for site in self
            .providers
            .preloaded
            .matching_sites(&self.input.search_string)
        {
            let mut m = CandidateMatch::new(site.url.clone(), FRECENCY_DEFAULT - 1.0);
            m.comment = site.title;
            m.icon = icon_for_url(&site.url);
            m.style = "preloaded-top-site".into();
            self.add_candidate(m);
            if !self.pending() {
                return;
            }
        }
    }

    async fn match_extension_suggestions(self: &Arc<Self>, keyword: String) {
        // Drop rows from the previous search early even if the extension
        // has not answered yet.
        let stale_cleaner = {
            let this = Arc::clone(self);
            AbortOnDropHandle::new(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(EXTENSION_STALE_CLEANUP_MS)).await;
                this.clean_up_non_current(MatchType::Extension, false);
            }))
        };

        let text = self.input.trimmed_original[keyword.len()..]
            .trim_start()
            .to_string();
        let fetch = self
            .providers
            .extensions
            .suggestions(&keyword, &text, &self.token);
        let suggestions =
            match tokio::time::timeout(Duration::from_millis(EXTENSION_TIMEOUT_MS), fetch).await {
                Ok(suggestions) => suggestions,
                Err(_) => Vec::new(),
            };
        drop(stale_cleaner);

        for suggestion in suggestions {
            if self.extension_count.load(Ordering::SeqCst) >= MAX_EXTENSION_MATCHES - 1 {
                break;
            }
            let mut m = CandidateMatch::with_action(
                Action::ExtensionMatch {
                    content: suggestion.content,
                    keyword: keyword.clone(),
                },
                FRECENCY_DEFAULT,
            );
            m.comment = suggestion.description;
            m.style = "action extension".into();
            m.match_type = MatchType::Extension;
            self.add_candidate(m);
            if !self.pending() {
                return;
            }
        }
        self.clean_up_non_current(MatchType::Extension, true);
    }

    async fn match_search_suggestions(self: &Arc<Self>) {
        if !self.input.has_behavior(SearchBehavior::SEARCHES)
            || self.input.options.in_private_window
        {
            return;
        }
        if self.prohibit_suggestions.load(Ordering::SeqCst)
            || self.prohibit_search_suggestions_for(&self.input.search_string)
        {
            return;
        }
        let Some(engine) = self.providers.engines.default_engine() else {
            return;
        };

        let max_chars = self.prefs.get_int("maxCharsForSearchSuggestions").max(0) as usize;
        let capped: String = self
            .input
            .tokens
            .join(" ")
            .chars()
            .take(max_chars)
            .collect();
        let max_historical =
            self.prefs.get_int("maxHistoricalSearchSuggestions").max(0) as usize;
        let request = SuggestionRequest {
            search_string: capped,
            in_private_window: self.input.options.in_private_window,
            max_historical,
            max_remote: self.max_rich_results.saturating_sub(max_historical),
            user_context_id: self.input.options.user_context_id,
        };
        let fetch = self.providers.suggestions.fetch(request, &self.token);
        let batch = tokio::select! {
            result = tokio::time::timeout(Duration::from_millis(SUGGESTION_TIMEOUT_MS), fetch) => {
                result.unwrap_or_default()
            }
            _ = self.token.cancelled() => return,
        };

        if batch.len() < 2 {
            *self.last_low_results.lock() = Some(self.input.original.clone());
        }

        let query = self.input.tokens.join(" ");
        let suggestions = batch
            .historical
            .into_iter()
            .map(|s| (true, s))
            .chain(batch.remote.into_iter().map(|s| (false, s)));
        for (historical, suggestion) in suggestions {
            // Never suggest navigating somewhere the user did not type.
            if looks_like_url(&suggestion, false) {
                continue;
            }
            let mut m = CandidateMatch::with_action(
                Action::SearchEngine {
                    engine: engine.name.clone(),
                    query: query.clone(),
                    suggestion: Some(suggestion),
                    alias: None,
                    input: query.clone(),
                },
                FRECENCY_DEFAULT,
            );
            m.comment = engine.name.clone();
            m.icon = engine.icon_url.clone().unwrap_or_default();
            m.match_type = MatchType::Suggestion;
            m.style = if historical {
                "action searchengine suggestion history".into()
            } else {
                "action searchengine suggestion".into()
            };
            self.add_candidate(m);
            if !self.pending() {
                return;
            }
        }
    }

    fn prohibit_search_suggestions_for(&self, search_string: &str) -> bool {
        if search_string.chars().count() < 2 {
            return true;
        }
        let tokens = &self.input.tokens;
        if tokens.len() == 1
            && is_single_word_host(&tokens[0])
            && self
                .providers
                .suggestions
                .is_domain_whitelisted(&tokens[0].to_lowercase())
        {
            return true;
        }
        let trimmed = self.input.trimmed_original.to_lowercase();
        for prefix in DISALLOWED_URLLIKE_PREFIXES {
            if trimmed == prefix || trimmed.starts_with(&format!("{}:", prefix)) {
                return true;
            }
        }
        tokens.iter().any(|t| looks_like_url(t, true))
    }

    // ═════════════════════════════════════════════════════════════════════
    // Row conversion and insertion
    // ═════════════════════════════════════════════════════════════════════

    fn candidate_from_row(&self, row: &PlaceRow) -> CandidateMatch {
        let frecency = row.frecency.unwrap_or(FRECENCY_DEFAULT);
        let open_in_tab = self.input.options.enable_actions
            && row.open_count > 0
            && self.input.has_behavior(SearchBehavior::OPENPAGE);

        let mut m = if open_in_tab {
            CandidateMatch::with_action(Action::SwitchTab { url: row.url.clone() }, frecency)
        } else {
            CandidateMatch::new(row.url.clone(), frecency)
        };

        let mut title = row
            .bookmark_title
            .clone()
            .or_else(|| row.title.clone())
            .unwrap_or_default();
        if let Some(tags) = &row.tags {
            title = format!("{}{}{}", title, TITLE_TAGS_SEPARATOR, tags);
        }
        m.comment = title;
        m.icon = icon_for_url(&row.url);
        m.place_id = row.place_id;
        m.style = if open_in_tab {
            "action switchtab".into()
        } else if row.bookmarked {
            if row.tags.is_some() {
                "bookmark-tag".into()
            } else {
                "bookmark".into()
            }
        } else if row.tags.is_some() {
            "tag".into()
        } else {
            "favicon".into()
        };
        m
    }

    /// The relational search text with the first token swapped for the host
    /// an alias or keyword resolved to.
    fn keyword_substituted_search_string(&self) -> String {
        let mut tokens = self.input.tokens.clone();
        if let Some(substitute) = self.keyword_substitute.lock().clone() {
            if let Some(first) = tokens.first_mut() {
                *first = substitute;
            }
        }
        tokens.join(" ")
    }

    fn add_candidate(self: &Arc<Self>, mut m: CandidateMatch) -> bool {
        if !self.pending() {
            return false;
        }
        let heuristic = self.adding_heuristic.load(Ordering::SeqCst);
        if heuristic {
            m.match_type = MatchType::Heuristic;
        }
        if m.style.is_empty() {
            m.style = "favicon".into();
        }
        if self.prefs.get_bool("restyleSearches") && m.style == "favicon" {
            self.maybe_restyle_search_match(&mut m);
        }
        if heuristic && !m.style.contains("heuristic") {
            m.style.push_str(" heuristic");
        }

        let (inserted, total) = {
            let mut sink = self.sink.lock();
            let inserted = sink.add(m);
            (inserted, sink.current_match_count())
        };
        let Some(match_type) = inserted else {
            return false;
        };
        if total == 1 || total == 6 {
            debug!(
                search_string = %self.input.original,
                results = total,
                "result milestone"
            );
        }
        if match_type == MatchType::Extension {
            self.extension_count.fetch_add(1, Ordering::SeqCst);
        }
        self.notify(match_type == MatchType::Heuristic);
        true
    }

    /// Restyles a plain history entry that is really a search result page
    /// for terms related to the current input.
    fn maybe_restyle_search_match(&self, m: &mut CandidateMatch) {
        let Some(parse) = self.providers.engines.parse_submission_url(&m.value) else {
            return;
        };
        let terms = parse.terms.to_lowercase();
        if !self.input.tokens.is_empty()
            && self
                .input
                .tokens
                .iter()
                .all(|t| !terms.contains(&t.to_lowercase()))
        {
            return;
        }
        let action = Action::SearchEngine {
            engine: parse.engine_name.clone(),
            query: parse.terms.clone(),
            suggestion: None,
            alias: None,
            input: parse.terms,
        };
        m.value = action.to_value_string();
        m.action = Some(action);
        m.comment = parse.engine_name;
        m.style = "action searchengine favicon".into();
    }

    // ═════════════════════════════════════════════════════════════════════
    // Cleanup and notification
    // ═════════════════════════════════════════════════════════════════════

    fn clean_up_non_current(self: &Arc<Self>, match_type: MatchType, notify: bool) {
        let changed = self.sink.lock().clean_up_non_current(match_type);
        if changed && notify {
            self.notify(false);
        }
    }

    /// On a restricted search, rows of previous types the restriction never
    /// re-confirmed are removed before the final notification.
    fn clean_up_restrict_non_current(&self) {
        if !self.input.behavior.contains(SearchBehavior::RESTRICT) {
            return;
        }
        let mut sink = self.sink.lock();
        for match_type in sink.previous_type_set() {
            if sink.count(match_type) == 0 {
                sink.clean_up_non_current(match_type);
            }
        }
    }

    /// Coalesces bursts of row changes into one notification per delay
    /// window, with a forced flush so a steady stream cannot starve the
    /// observer. Heuristic matches always notify immediately.
    fn notify(self: &Arc<Self>, skip_delay: bool) {
        if !self.pending() {
            return;
        }
        // The observer may re-enter stop() or notify(), so the timer lock
        // must be released before the callback runs.
        let fire = {
            let mut timer = self.notify_timer.lock();
            if skip_delay {
                *timer = None;
                self.notify_delays.store(0, Ordering::SeqCst);
                true
            } else if timer.is_some() {
                let delays = self.notify_delays.fetch_add(1, Ordering::SeqCst) + 1;
                if delays > MAX_NOTIFY_DELAYS {
                    *timer = None;
                    self.notify_delays.store(0, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            } else {
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(NOTIFY_DELAY_MS)).await;
                    *this.notify_timer.lock() = None;
                    this.notify_delays.store(0, Ordering::SeqCst);
                    if this.pending() {
                        this.do_notify(true);
                    }
                });
                *timer = Some(AbortOnDropHandle::new(handle));
                false
            }
        };
        if fire {
            self.do_notify(true);
        }
    }

    fn do_notify(&self, ongoing: bool) {
        let code = match (self.buffer.row_count() > 0, ongoing) {
            (true, true) => SearchResultCode::SuccessOngoing,
            (false, true) => SearchResultCode::NoMatchOngoing,
            (true, false) => SearchResultCode::Success,
            (false, false) => SearchResultCode::NoMatch,
        };
        self.buffer.set_code(code);
        self.observer.on_search_result(&self.buffer);
    }

    async fn sleep_ms(&self, ms: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
            _ = self.token.cancelled() => false,
        }
    }
}
