//! Preference snapshot for the autocomplete engine.
//!
//! Values are read lazily and memoized; setting a preference invalidates the
//! memo for that key plus the documented dependent keys, and keeps the
//! master enable flag and the per-source suggest flags linked.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::models::{MatchType, SearchBehavior};

/// How previous-search rows are reused when a new search starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMethod {
    /// Always rebuild from scratch.
    Append = 0,
    /// Merge with the previous result when the search strings are related.
    MergeRelated = 1,
    /// Always merge with the previous result.
    Merge = 2,
}

/// Token-to-text matching mode used by the relational queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBehavior {
    Anywhere = 0,
    /// First match on word boundaries, then retry anywhere if under-filled.
    BoundaryAnywhere = 1,
    Boundary = 2,
    Beginning = 3,
}

impl MatchBehavior {
    pub fn from_int(v: i64) -> MatchBehavior {
        match v {
            0 => MatchBehavior::Anywhere,
            2 => MatchBehavior::Boundary,
            3 => MatchBehavior::Beginning,
            // Out-of-range values fall back to the default.
            _ => MatchBehavior::BoundaryAnywhere,
        }
    }
}

/// One bucket: the match type it accepts and its capacity
/// (`usize::MAX` meaning unbounded).
pub type BucketPlan = Vec<(MatchType, usize)>;

/// Extension matches allowed per search, heuristic included.
pub const MAX_EXTENSION_MATCHES: usize = 6;

#[derive(Debug, Clone, PartialEq)]
enum PrefValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

static PREF_DEFAULTS: Lazy<HashMap<&'static str, PrefValue>> = Lazy::new(|| {
    use PrefValue::*;
    HashMap::from([
        ("autocomplete.enabled", Bool(true)),
        ("autoFill", Bool(true)),
        ("autoFill.searchEngines", Bool(false)),
        ("autoFill.stddevMultiplier", Float(0.0)),
        ("restyleSearches", Bool(false)),
        ("delay", Int(50)),
        ("matchBehavior", Int(MatchBehavior::BoundaryAnywhere as i64)),
        ("maxRichResults", Int(10)),
        ("suggest.history", Bool(true)),
        ("suggest.bookmark", Bool(true)),
        ("suggest.openpage", Bool(true)),
        ("suggest.searches", Bool(false)),
        ("suggest.history.onlyTyped", Bool(false)),
        ("maxCharsForSearchSuggestions", Int(20)),
        ("maxHistoricalSearchSuggestions", Int(0)),
        ("usepreloadedtopurls.enabled", Bool(true)),
        ("usepreloadedtopurls.expire_days", Int(14)),
        ("matchBuckets", Str("suggestion:4,general:Infinity".into())),
        ("matchBucketsSearch", Str(String::new())),
        ("insertMethod", Int(InsertMethod::MergeRelated as i64)),
        ("keyword.enabled", Bool(true)),
    ])
});

const SUGGEST_TYPES: [&str; 4] = [
    "suggest.history",
    "suggest.bookmark",
    "suggest.openpage",
    "suggest.searches",
];

/// Fixed buckets placed before the user-configured ones. Anything with an
/// infinite frecency lands here.
fn buckets_before() -> BucketPlan {
    vec![
        (MatchType::Heuristic, 1),
        (MatchType::Extension, MAX_EXTENSION_MATCHES - 1),
    ]
}

/// Catch-all buckets placed after the user-configured ones.
fn buckets_after() -> BucketPlan {
    vec![
        (MatchType::Suggestion, usize::MAX),
        (MatchType::General, usize::MAX),
    ]
}

fn parse_bucket_list(s: &str) -> Option<BucketPlan> {
    let mut plan = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        let (name, count) = part.split_once(':')?;
        let match_type = match name.trim() {
            "heuristic" => MatchType::Heuristic,
            "general" => MatchType::General,
            "suggestion" => MatchType::Suggestion,
            "extension" => MatchType::Extension,
            _ => return None,
        };
        let count = match count.trim() {
            "Infinity" => usize::MAX,
            n => n.parse::<usize>().ok()?,
        };
        plan.push((match_type, count));
    }
    Some(plan)
}

#[derive(Default)]
struct Derived {
    default_behavior: Option<SearchBehavior>,
    empty_search_default_behavior: Option<SearchBehavior>,
    match_behavior: Option<MatchBehavior>,
    match_buckets: Option<BucketPlan>,
    match_buckets_search: Option<BucketPlan>,
    suggest_history_only_typed: Option<bool>,
}

struct Inner {
    values: HashMap<&'static str, PrefValue>,
    derived: Derived,
    /// Re-entrancy guard for linked preference updates.
    linking: bool,
}

/// The preference store. Cheap to clone behind an `Arc`; all engine
/// components read through it so a change is visible to the next search.
pub struct PrefStore {
    inner: Mutex<Inner>,
}

impl Default for PrefStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefStore {
    pub fn new() -> Self {
        PrefStore {
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                derived: Derived::default(),
                linking: false,
            }),
        }
    }

    // ── typed getters ───────────────────────────────────────────

    pub fn get_bool(&self, name: &str) -> bool {
        match read(&self.inner.lock(), name) {
            PrefValue::Bool(v) => v,
            other => panic!("pref {} is not a bool: {:?}", name, other),
        }
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match read(&self.inner.lock(), name) {
            PrefValue::Int(v) => v,
            other => panic!("pref {} is not an int: {:?}", name, other),
        }
    }

    pub fn get_float(&self, name: &str) -> f64 {
        match read(&self.inner.lock(), name) {
            PrefValue::Float(v) => v,
            other => panic!("pref {} is not a float: {:?}", name, other),
        }
    }

    pub fn get_str(&self, name: &str) -> String {
        match read(&self.inner.lock(), name) {
            PrefValue::Str(v) => v,
            other => panic!("pref {} is not a string: {:?}", name, other),
        }
    }

    // ── setters ─────────────────────────────────────────────────

    pub fn set_bool(&self, name: &str, value: bool) {
        self.set(name, PrefValue::Bool(value));
    }

    pub fn set_int(&self, name: &str, value: i64) {
        self.set(name, PrefValue::Int(value));
    }

    pub fn set_float(&self, name: &str, value: f64) {
        self.set(name, PrefValue::Float(value));
    }

    pub fn set_str(&self, name: &str, value: impl Into<String>) {
        self.set(name, PrefValue::Str(value.into()));
    }

    fn set(&self, name: &str, value: PrefValue) {
        let mut inner = self.inner.lock();
        let key = known_key(name);
        inner.values.insert(key, value);
        invalidate(&mut inner, key);
        if key == "autocomplete.enabled" || key.starts_with("suggest.") {
            update_linked_prefs(&mut inner, key);
        }
    }

    // ── derived values ──────────────────────────────────────────

    /// OR of the behavior bits for every enabled suggest source.
    pub fn default_behavior(&self) -> SearchBehavior {
        let mut inner = self.inner.lock();
        if let Some(v) = inner.derived.default_behavior {
            return v;
        }
        let mut v = SearchBehavior::empty();
        for (pref, flag) in [
            ("suggest.history", SearchBehavior::HISTORY),
            ("suggest.bookmark", SearchBehavior::BOOKMARK),
            ("suggest.openpage", SearchBehavior::OPENPAGE),
            ("suggest.searches", SearchBehavior::SEARCHES),
        ] {
            if as_bool(read(&inner, pref)) {
                v.insert(flag);
            }
        }
        if suggest_history_only_typed(&inner) {
            v.insert(SearchBehavior::TYPED);
        }
        inner.derived.default_behavior = Some(v);
        v
    }

    /// Restrictions applied when searching for "": typed history when
    /// history is enabled, else bookmarks, else open pages.
    pub fn empty_search_default_behavior(&self) -> SearchBehavior {
        let mut inner = self.inner.lock();
        if let Some(v) = inner.derived.empty_search_default_behavior {
            return v;
        }
        let mut v = SearchBehavior::RESTRICT;
        if as_bool(read(&inner, "suggest.history")) {
            v.insert(SearchBehavior::HISTORY);
            v.insert(SearchBehavior::TYPED);
        } else if as_bool(read(&inner, "suggest.bookmark")) {
            v.insert(SearchBehavior::BOOKMARK);
        } else {
            v.insert(SearchBehavior::OPENPAGE);
        }
        inner.derived.empty_search_default_behavior = Some(v);
        v
    }

    pub fn match_behavior(&self) -> MatchBehavior {
        let mut inner = self.inner.lock();
        if let Some(v) = inner.derived.match_behavior {
            return v;
        }
        let v = MatchBehavior::from_int(as_int(read(&inner, "matchBehavior")));
        inner.derived.match_behavior = Some(v);
        v
    }

    pub fn insert_method(&self) -> InsertMethod {
        match self.get_int("insertMethod") {
            0 => InsertMethod::Append,
            2 => InsertMethod::Merge,
            _ => InsertMethod::MergeRelated,
        }
    }

    /// The general bucket plan: user buckets sandwiched between the fixed
    /// heuristic/extension head and the suggestion/general tail. A malformed
    /// pref string falls back to the default.
    pub fn match_buckets(&self) -> BucketPlan {
        let mut inner = self.inner.lock();
        if let Some(v) = &inner.derived.match_buckets {
            return v.clone();
        }
        let v = compute_match_buckets(&inner);
        inner.derived.match_buckets = Some(v.clone());
        v
    }

    /// Bucket plan used when the heuristic result is a search engine match.
    /// An empty or malformed pref string means "same as matchBuckets".
    pub fn match_buckets_search(&self) -> BucketPlan {
        let mut inner = self.inner.lock();
        if let Some(v) = &inner.derived.match_buckets_search {
            return v.clone();
        }
        let raw = as_str(read(&inner, "matchBucketsSearch"));
        let v = match parse_bucket_list(&raw) {
            Some(user) if !raw.is_empty() => {
                let mut plan = buckets_before();
                plan.extend(user);
                plan.extend(buckets_after());
                plan
            }
            _ => compute_match_buckets(&inner),
        };
        inner.derived.match_buckets_search = Some(v.clone());
        v
    }

    pub fn suggest_history_only_typed(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(v) = inner.derived.suggest_history_only_typed {
            return v;
        }
        let v = suggest_history_only_typed(&inner);
        inner.derived.suggest_history_only_typed = Some(v);
        v
    }
}

fn known_key(name: &str) -> &'static str {
    PREF_DEFAULTS
        .keys()
        .find(|k| **k == name)
        .copied()
        .unwrap_or_else(|| panic!("trying to access an unknown pref {}", name))
}

fn read(inner: &Inner, name: &str) -> PrefValue {
    if let Some(v) = inner.values.get(name) {
        return v.clone();
    }
    PREF_DEFAULTS
        .get(name)
        .cloned()
        .unwrap_or_else(|| panic!("trying to access an unknown pref {}", name))
}

fn as_bool(v: PrefValue) -> bool {
    match v {
        PrefValue::Bool(b) => b,
        other => panic!("expected bool pref, got {:?}", other),
    }
}

fn as_int(v: PrefValue) -> i64 {
    match v {
        PrefValue::Int(i) => i,
        other => panic!("expected int pref, got {:?}", other),
    }
}

fn as_str(v: PrefValue) -> String {
    match v {
        PrefValue::Str(s) => s,
        other => panic!("expected string pref, got {:?}", other),
    }
}

fn suggest_history_only_typed(inner: &Inner) -> bool {
    // If history is disabled, the onlyTyped flag is ignored.
    as_bool(read(inner, "suggest.history")) && as_bool(read(inner, "suggest.history.onlyTyped"))
}

fn compute_match_buckets(inner: &Inner) -> BucketPlan {
    let raw = as_str(read(inner, "matchBuckets"));
    let user = parse_bucket_list(&raw).unwrap_or_else(|| {
        let default = as_str(
            PREF_DEFAULTS
                .get("matchBuckets")
                .cloned()
                .expect("matchBuckets default"),
        );
        parse_bucket_list(&default).expect("default matchBuckets parses")
    });
    let mut plan = buckets_before();
    plan.extend(user);
    plan.extend(buckets_after());
    plan
}

fn invalidate(inner: &mut Inner, key: &str) {
    match key {
        "matchBuckets" => {
            inner.derived.match_buckets = None;
            inner.derived.match_buckets_search = None;
        }
        "matchBucketsSearch" => inner.derived.match_buckets_search = None,
        "matchBehavior" => inner.derived.match_behavior = None,
        "suggest.history" => {
            inner.derived.suggest_history_only_typed = None;
        }
        "suggest.history.onlyTyped" => {
            inner.derived.suggest_history_only_typed = None;
        }
        _ => {}
    }
    if key == "autocomplete.enabled" || key.starts_with("suggest.") {
        inner.derived.default_behavior = None;
        inner.derived.empty_search_default_behavior = None;
    }
}

/// Keeps `autocomplete.enabled` and the `suggest.*` flags consistent:
/// changing a suggest flag recomputes the master flag, enabling the master
/// flag with every source off restores the source defaults, and disabling
/// the master flag turns every source off.
fn update_linked_prefs(inner: &mut Inner, changed: &str) {
    if inner.linking {
        return;
    }
    inner.linking = true;

    if changed.starts_with("suggest.") {
        let any_on = SUGGEST_TYPES.iter().any(|p| as_bool(read(inner, p)));
        inner
            .values
            .insert("autocomplete.enabled", PrefValue::Bool(any_on));
        invalidate(inner, "autocomplete.enabled");
    } else if as_bool(read(inner, "autocomplete.enabled")) {
        if SUGGEST_TYPES.iter().all(|p| !as_bool(read(inner, p))) {
            for p in SUGGEST_TYPES {
                let def = PREF_DEFAULTS.get(p).cloned().expect("suggest default");
                inner.values.insert(known_key(p), def);
                invalidate(inner, p);
            }
        }
    } else {
        for p in SUGGEST_TYPES {
            inner.values.insert(known_key(p), PrefValue::Bool(false));
            invalidate(inner, p);
        }
    }

    inner.linking = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = PrefStore::new();
        assert!(prefs.get_bool("autoFill"));
        assert_eq!(prefs.get_int("delay"), 50);
        assert_eq!(prefs.get_int("maxRichResults"), 10);
        assert_eq!(prefs.get_float("autoFill.stddevMultiplier"), 0.0);
        assert_eq!(prefs.match_behavior(), MatchBehavior::BoundaryAnywhere);
        assert_eq!(prefs.insert_method(), InsertMethod::MergeRelated);
    }

    #[test]
    #[should_panic(expected = "unknown pref")]
    fn test_unknown_pref_panics() {
        PrefStore::new().get_bool("no.such.pref");
    }

    #[test]
    fn test_default_behavior_reflects_suggest_flags() {
        let prefs = PrefStore::new();
        let b = prefs.default_behavior();
        assert!(b.contains(SearchBehavior::HISTORY));
        assert!(b.contains(SearchBehavior::BOOKMARK));
        assert!(b.contains(SearchBehavior::OPENPAGE));
        assert!(!b.contains(SearchBehavior::SEARCHES));

        prefs.set_bool("suggest.bookmark", false);
        let b = prefs.default_behavior();
        assert!(!b.contains(SearchBehavior::BOOKMARK));
    }

    #[test]
    fn test_empty_search_behavior_cascade() {
        let prefs = PrefStore::new();
        let b = prefs.empty_search_default_behavior();
        assert!(b.contains(SearchBehavior::RESTRICT));
        assert!(b.contains(SearchBehavior::TYPED));

        prefs.set_bool("suggest.history", false);
        let b = prefs.empty_search_default_behavior();
        assert!(b.contains(SearchBehavior::BOOKMARK));
        assert!(!b.contains(SearchBehavior::HISTORY));

        prefs.set_bool("suggest.bookmark", false);
        let b = prefs.empty_search_default_behavior();
        assert!(b.contains(SearchBehavior::OPENPAGE));
    }

    #[test]
    fn test_disabling_all_suggest_flags_disables_autocomplete() {
        let prefs = PrefStore::new();
        for p in SUGGEST_TYPES {
            prefs.set_bool(p, false);
        }
        assert!(!prefs.get_bool("autocomplete.enabled"));
    }

    #[test]
    fn test_enabling_autocomplete_restores_suggest_defaults() {
        let prefs = PrefStore::new();
        for p in SUGGEST_TYPES {
            prefs.set_bool(p, false);
        }
        prefs.set_bool("autocomplete.enabled", true);
        assert!(prefs.get_bool("suggest.history"));
        assert!(prefs.get_bool("suggest.bookmark"));
        assert!(prefs.get_bool("suggest.openpage"));
        assert!(!prefs.get_bool("suggest.searches"));
    }

    #[test]
    fn test_disabling_autocomplete_forces_suggest_flags_off() {
        let prefs = PrefStore::new();
        prefs.set_bool("autocomplete.enabled", false);
        for p in SUGGEST_TYPES {
            assert!(!prefs.get_bool(p), "{} should be off", p);
        }
        // The linked update must not loop back and re-enable the master
        // flag from the suggest change it just made.
        assert!(!prefs.get_bool("autocomplete.enabled"));
    }

    #[test]
    fn test_match_buckets_default() {
        let prefs = PrefStore::new();
        let plan = prefs.match_buckets();
        assert_eq!(
            plan,
            vec![
                (MatchType::Heuristic, 1),
                (MatchType::Extension, 5),
                (MatchType::Suggestion, 4),
                (MatchType::General, usize::MAX),
                (MatchType::Suggestion, usize::MAX),
                (MatchType::General, usize::MAX),
            ]
        );
    }

    #[test]
    fn test_malformed_match_buckets_falls_back() {
        let prefs = PrefStore::new();
        prefs.set_str("matchBuckets", "bogus~3;;");
        let plan = prefs.match_buckets();
        assert_eq!(plan[2], (MatchType::Suggestion, 4));
    }

    #[test]
    fn test_match_buckets_search_empty_falls_back_to_general() {
        let prefs = PrefStore::new();
        assert_eq!(prefs.match_buckets_search(), prefs.match_buckets());

        prefs.set_str("matchBucketsSearch", "general:5,suggestion:Infinity");
        let plan = prefs.match_buckets_search();
        assert_eq!(plan[2], (MatchType::General, 5));
        assert_eq!(plan[3], (MatchType::Suggestion, usize::MAX));
    }

    #[test]
    fn test_match_buckets_invalidation_cascades_to_search() {
        let prefs = PrefStore::new();
        let _ = prefs.match_buckets_search();
        prefs.set_str("matchBuckets", "suggestion:2,general:Infinity");
        // matchBucketsSearch is empty so it tracks matchBuckets.
        let plan = prefs.match_buckets_search();
        assert_eq!(plan[2], (MatchType::Suggestion, 2));
    }

    #[test]
    fn test_invalid_match_behavior_falls_back() {
        let prefs = PrefStore::new();
        prefs.set_int("matchBehavior", 42);
        assert_eq!(prefs.match_behavior(), MatchBehavior::BoundaryAnywhere);
        prefs.set_int("matchBehavior", 0);
        assert_eq!(prefs.match_behavior(), MatchBehavior::Anywhere);
    }

    #[test]
    fn test_only_typed_ignored_without_history() {
        let prefs = PrefStore::new();
        prefs.set_bool("suggest.history.onlyTyped", true);
        assert!(prefs.suggest_history_only_typed());
        prefs.set_bool("suggest.history", false);
        assert!(!prefs.suggest_history_only_typed());
    }
}
