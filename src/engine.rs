//! The engine consumers hold on to: starts and stops searches, reuses the
//! previous result set for related input, and forwards open-page
//! registrations to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::index::{FrecencyIndex, IndexResult, SwitchToTabRegistry};
use crate::interface::{OmniboxError, OmniboxResult, ResultBuffer, SearchObserver, SearchResultCode};
use crate::models::{MatchType, SearchInput, SearchOptions};
use crate::prefs::{InsertMethod, PrefStore};
use crate::providers::Providers;
use crate::search::Search;
use crate::store::PlacesStore;

pub struct OmniboxEngine {
    prefs: Arc<PrefStore>,
    store: Arc<PlacesStore>,
    providers: Providers,
    current: Mutex<Option<Arc<Search>>>,
    /// Previous buffer kept for in-place reuse on a related follow-up search.
    previous_buffer: Mutex<Option<Arc<ResultBuffer>>>,
    /// Search string whose suggestion fetch came back nearly empty.
    last_low_results: Mutex<Option<String>>,
    profile_created: Option<DateTime<Utc>>,
}

impl OmniboxEngine {
    pub fn new(prefs: Arc<PrefStore>, store: Arc<PlacesStore>, providers: Providers) -> Self {
        OmniboxEngine {
            prefs,
            store,
            providers,
            current: Mutex::new(None),
            previous_buffer: Mutex::new(None),
            last_low_results: Mutex::new(None),
            profile_created: None,
        }
    }

    pub fn with_profile_created(mut self, created: DateTime<Utc>) -> Self {
        self.profile_created = Some(created);
        self
    }

    pub fn prefs(&self) -> &Arc<PrefStore> {
        &self.prefs
    }

    pub fn store(&self) -> &Arc<PlacesStore> {
        &self.store
    }

    /// Starts a search, cancelling any search still in flight. The returned
    /// buffer is live; the observer is notified as rows arrive.
    pub fn start_search(
        self: &Arc<Self>,
        search_string: &str,
        options: SearchOptions,
        observer: Arc<dyn SearchObserver>,
    ) -> OmniboxResult<Arc<ResultBuffer>> {
        self.stop_search();
        self.expire_preloaded_sites();

        if !self.prefs.get_bool("autocomplete.enabled") {
            let buffer = Arc::new(ResultBuffer::new(search_string));
            buffer.set_code(SearchResultCode::NoMatch);
            observer.on_search_result(&buffer);
            return Ok(buffer);
        }

        self.store
            .ensure()
            .map_err(|e| OmniboxError::Store(e.to_string()))?;

        let input = SearchInput::new(search_string, options, &self.prefs);
        let prohibit_suggestions = self.carries_low_results(&input.original);
        let (buffer, previous_types) = self.buffer_for(&input.original);

        let index: Arc<dyn FrecencyIndex> = self.store.clone();
        let search = Search::new(
            input,
            Arc::clone(&self.prefs),
            index,
            self.providers.clone(),
            observer,
            Arc::clone(&buffer),
            previous_types,
            prohibit_suggestions,
        );
        *self.current.lock() = Some(Arc::clone(&search));
        *self.previous_buffer.lock() = Some(Arc::clone(&buffer));

        let engine = Arc::clone(self);
        let task = Arc::clone(&search);
        tokio::spawn(async move {
            task.clone().execute().await;
            if engine.is_current(&task) {
                engine.finish_search(&task, true);
            }
        });
        Ok(buffer)
    }

    /// Cancels the in-flight search without a final notification.
    pub fn stop_search(&self) {
        if let Some(search) = self.current.lock().take() {
            debug!(search_string = %search.input().original, "stopping search");
            self.capture_low_results(&search);
            search.stop();
        }
    }

    /// Forwarded to the store so filtered queries can offer tab switches.
    /// Registrations before the store is ready are queued.
    pub async fn register_open_page(&self, url: &str, user_context_id: i64) -> IndexResult<()> {
        self.store.register_open_page(url, user_context_id).await
    }

    pub async fn unregister_open_page(&self, url: &str, user_context_id: i64) -> IndexResult<()> {
        self.store.unregister_open_page(url, user_context_id).await
    }

    fn is_current(&self, search: &Arc<Search>) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, search))
    }

    fn finish_search(&self, search: &Arc<Search>, notify: bool) {
        self.capture_low_results(search);
        search.finish(notify);
    }

    fn capture_low_results(&self, search: &Arc<Search>) {
        if let Some(s) = search.take_last_low_results() {
            *self.last_low_results.lock() = Some(s);
        }
    }

    /// Whether the previous search already learned the suggestion backend
    /// has nothing for this input, so a longer refinement can skip the
    /// fetch.
    fn carries_low_results(&self, original: &str) -> bool {
        let last = self.last_low_results.lock();
        match last.as_deref() {
            Some(prev) => {
                !prev.is_empty() && original.len() > prev.len() && original.starts_with(prev)
            }
            None => false,
        }
    }

    /// Reuses the previous buffer when the new search refines the old one,
    /// so surviving rows are replaced in place instead of disappearing and
    /// reappearing.
    fn buffer_for(&self, original: &str) -> (Arc<ResultBuffer>, Vec<MatchType>) {
        let insert_method = self.prefs.insert_method();
        if insert_method != InsertMethod::Append {
            if let Some(previous) = self.previous_buffer.lock().as_ref() {
                let previous_string = previous.search_string();
                let related = insert_method == InsertMethod::Merge
                    || strings_related(&previous_string, original);
                if related {
                    let previous_types = previous
                        .styles()
                        .iter()
                        .map(|style| MatchType::from_style(style))
                        .collect();
                    previous.rebind(original);
                    return (Arc::clone(previous), previous_types);
                }
            }
        }
        (Arc::new(ResultBuffer::new(original)), Vec::new())
    }

    /// The preloaded top-sites list only helps new profiles; past the
    /// configured age it is switched off for good.
    fn expire_preloaded_sites(&self) {
        if !self.prefs.get_bool("usepreloadedtopurls.enabled") {
            return;
        }
        let Some(created) = self.profile_created else {
            return;
        };
        let expire_days = self.prefs.get_int("usepreloadedtopurls.expire_days").max(0);
        if Utc::now() - created > chrono::Duration::days(expire_days) {
            self.prefs.set_bool("usepreloadedtopurls.enabled", false);
        }
    }
}

/// Two search strings are related when one contains the other, ignoring
/// case. Covers both typing forward and deleting back.
fn strings_related(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}
