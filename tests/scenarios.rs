//! End-to-end searches through the public engine API: autofill thresholds,
//! result reuse across related searches, tab-switch upgrades, and bounded
//! completion when a provider hangs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use omnibox::providers::{
    EngineMatch, SearchEngineProvider, SuggestionBatch, SuggestionProvider, SuggestionRequest,
};
use omnibox::{
    OmniboxEngine, PageEntry, PlacesStore, PrefStore, Providers, ResultBuffer, SearchObserver,
    SearchOptions, SearchResultCode,
};

struct CodeLog {
    codes: Mutex<Vec<SearchResultCode>>,
}

impl CodeLog {
    fn new() -> Arc<Self> {
        Arc::new(CodeLog { codes: Mutex::new(Vec::new()) })
    }

    fn final_count(&self) -> usize {
        self.codes.lock().iter().filter(|c| !c.is_ongoing()).count()
    }
}

impl SearchObserver for CodeLog {
    fn on_search_result(&self, result: &ResultBuffer) {
        self.codes.lock().push(result.code());
    }
}

fn engine_with(store: Arc<PlacesStore>, providers: Providers) -> Arc<OmniboxEngine> {
    let prefs = Arc::new(PrefStore::new());
    prefs.set_int("delay", 0);
    Arc::new(OmniboxEngine::new(prefs, store, providers))
}

async fn run_search(
    engine: &Arc<OmniboxEngine>,
    search_string: &str,
    options: SearchOptions,
    observer: Arc<CodeLog>,
) -> Arc<ResultBuffer> {
    let buffer = engine
        .start_search(search_string, options, observer)
        .unwrap();
    wait_final(&buffer).await;
    buffer
}

async fn wait_final(buffer: &Arc<ResultBuffer>) {
    for _ in 0..500 {
        if !buffer.code().is_ongoing() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("search did not finish: code {:?}", buffer.code());
}

fn values(buffer: &ResultBuffer) -> Vec<String> {
    buffer.rows().iter().map(|r| r.value.clone()).collect()
}

struct StaticEngines;

impl SearchEngineProvider for StaticEngines {
    fn engine_by_alias(&self, _alias: &str) -> Option<EngineMatch> {
        None
    }
    fn engine_by_domain(&self, _token: &str) -> Option<EngineMatch> {
        None
    }
    fn default_engine(&self) -> Option<EngineMatch> {
        Some(EngineMatch {
            name: "TestEngine".into(),
            alias: None,
            result_domain: "search.example.com".into(),
            search_url: "https://search.example.com/".into(),
            icon_url: None,
        })
    }
}

/// A suggestion backend that never answers.
struct HungSuggestions;

#[async_trait]
impl SuggestionProvider for HungSuggestions {
    async fn fetch(
        &self,
        _request: SuggestionRequest,
        _token: &CancellationToken,
    ) -> SuggestionBatch {
        std::future::pending().await
    }
}

fn seed_origin(store: &PlacesStore, url: &str, frecency: i64) {
    let mut page = PageEntry::new(url);
    page.frecency = frecency;
    page.title = Some("Example".into());
    store.add_page(&page).unwrap();
}

// ============================================================
// Autofill threshold
// ============================================================

#[tokio::test]
async fn autofill_completes_origin_above_threshold() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    seed_origin(&store, "http://example.com/", 500);
    // mean 100, stddev 50; multiplier 2 puts the cutoff at 200.
    store.set_origin_frecency_stats(4, 400.0, 50_000.0).unwrap();

    let engine = engine_with(store, Providers::default());
    engine.prefs().set_float("autoFill.stddevMultiplier", 2.0);

    let buffer = run_search(&engine, "exa", SearchOptions::default(), CodeLog::new()).await;
    let rows = buffer.rows();
    assert!(rows[0].style.contains("autofill"), "style: {}", rows[0].style);
    assert_eq!(rows[0].value, "example.com/");
    assert_eq!(rows[0].final_complete_value, "http://example.com/");
    assert_eq!(buffer.default_index(), Some(0));
}

#[tokio::test]
async fn autofill_rejects_origin_below_threshold() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    seed_origin(&store, "http://example.com/", 500);
    // Same stats, but multiplier 10 puts the cutoff at 600.
    store.set_origin_frecency_stats(4, 400.0, 50_000.0).unwrap();

    let engine = engine_with(store, Providers::default());
    engine.prefs().set_float("autoFill.stddevMultiplier", 10.0);

    let buffer = run_search(&engine, "exa", SearchOptions::default(), CodeLog::new()).await;
    assert!(buffer.rows().iter().all(|r| !r.style.contains("autofill")));
    assert_eq!(buffer.default_index(), None);
}

// ============================================================
// Result reuse across related searches
// ============================================================

#[tokio::test]
async fn refining_search_reuses_buffer_and_drops_stale_rows() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    for (url, frecency) in [
        ("http://mozilla.org/firefox/", 2000),
        ("http://mozambique-travel.example.com/guide", 1500),
    ] {
        let mut page = PageEntry::new(url);
        page.title = Some("page".into());
        page.frecency = frecency;
        store.add_page(&page).unwrap();
    }

    let engine = engine_with(store, Providers::default());
    engine.prefs().set_bool("autoFill", false);

    let first = run_search(&engine, "moz", SearchOptions::default(), CodeLog::new()).await;
    assert_eq!(first.row_count(), 2);

    let second = run_search(&engine, "mozil", SearchOptions::default(), CodeLog::new()).await;
    assert!(Arc::ptr_eq(&first, &second));
    let remaining = values(&second);
    assert_eq!(remaining, vec!["http://mozilla.org/firefox/"]);
}

// ============================================================
// Tab switching
// ============================================================

#[tokio::test]
async fn open_page_upgrades_history_row_to_switchtab() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    let mut page = PageEntry::new("http://mozilla.org/firefox/");
    page.title = Some("Firefox".into());
    page.frecency = 2000;
    store.add_page(&page).unwrap();

    let engine = engine_with(store, Providers::default());
    engine.prefs().set_bool("autoFill", false);
    engine
        .register_open_page("http://mozilla.org/firefox/", 0)
        .await
        .unwrap();

    let options = SearchOptions { enable_actions: true, ..Default::default() };
    let buffer = run_search(&engine, "firefox", options, CodeLog::new()).await;

    let rows = buffer.rows();
    let tab_rows: Vec<_> = rows.iter().filter(|r| r.style.contains("switchtab")).collect();
    assert_eq!(tab_rows.len(), 1);
    // The plain history row was folded into the tab switch, not duplicated.
    assert!(!rows
        .iter()
        .any(|r| r.value == "http://mozilla.org/firefox/" && !r.style.contains("switchtab")));
}

#[tokio::test]
async fn open_pages_registered_before_store_init_are_kept() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(PlacesStore::new(dir.path().join("places.sqlite")));
    let engine = engine_with(store, Providers::default());

    // The store has no pool yet; the registration must queue.
    engine
        .register_open_page("http://queued.example.com/", 0)
        .await
        .unwrap();

    let options = SearchOptions { enable_actions: true, ..Default::default() };
    let buffer = run_search(&engine, "queued", options, CodeLog::new()).await;
    assert!(buffer.rows().iter().any(|r| r.style.contains("switchtab")));
}

// ============================================================
// Bounded completion and notification discipline
// ============================================================

#[tokio::test(start_paused = true)]
async fn hung_suggestion_backend_cannot_wedge_the_search() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    let providers = Providers {
        engines: Arc::new(StaticEngines),
        suggestions: Arc::new(HungSuggestions),
        ..Default::default()
    };
    let engine = engine_with(store, providers);
    engine.prefs().set_bool("suggest.searches", true);

    let options = SearchOptions { enable_actions: true, ..Default::default() };
    let observer = CodeLog::new();
    let buffer = run_search(&engine, "coffee shop", options, Arc::clone(&observer)).await;

    assert!(!buffer.code().is_ongoing());
    // The default engine heuristic still made it in.
    assert!(buffer.rows()[0].style.contains("searchengine"));
}

#[tokio::test]
async fn exactly_one_final_notification() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    seed_origin(&store, "http://example.com/", 500);

    let engine = engine_with(store, Providers::default());
    let observer = CodeLog::new();
    run_search(&engine, "exa", SearchOptions::default(), Arc::clone(&observer)).await;

    // Redundant stops after completion stay silent.
    engine.stop_search();
    engine.stop_search();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(observer.final_count(), 1);
}

#[tokio::test]
async fn result_count_respects_max_rich_results() {
    let store = Arc::new(PlacesStore::open_in_memory().unwrap());
    for i in 0..10 {
        let mut page = PageEntry::new(format!("http://site{}.example.com/moz", i));
        page.title = Some("moz page".into());
        page.frecency = 1000 + i;
        store.add_page(&page).unwrap();
    }

    let engine = engine_with(store, Providers::default());
    engine.prefs().set_bool("autoFill", false);
    engine.prefs().set_int("maxRichResults", 3);

    let buffer = run_search(&engine, "moz", SearchOptions::default(), CodeLog::new()).await;
    assert_eq!(buffer.row_count(), 3);
}
