//! Internal data model: the parsed search input, candidate matches and the
//! actions they carry.

use serde::{Deserialize, Serialize};

use crate::fixup::{split_prefix, unescape_for_display};
use crate::prefs::PrefStore;

/// The frecency attached to matches whose real frecency is unknown.
pub const FRECENCY_DEFAULT: f64 = 1000.0;

/// Frecency for matches that must sort into the always-first buckets
/// (heuristic and extension results).
pub const FRECENCY_INFINITE: f64 = f64::INFINITY;

// ─────────────────────────────────────────────────────────────────────────────
// Behavior bitmask
// ─────────────────────────────────────────────────────────────────────────────

/// Search behavior flags. These restrict which sources a search may draw
/// from and which fields a token must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchBehavior(pub u32);

impl SearchBehavior {
    pub const HISTORY: SearchBehavior = SearchBehavior(1 << 0);
    pub const BOOKMARK: SearchBehavior = SearchBehavior(1 << 1);
    pub const TAG: SearchBehavior = SearchBehavior(1 << 2);
    pub const TITLE: SearchBehavior = SearchBehavior(1 << 3);
    pub const URL: SearchBehavior = SearchBehavior(1 << 4);
    pub const TYPED: SearchBehavior = SearchBehavior(1 << 5);
    pub const OPENPAGE: SearchBehavior = SearchBehavior(1 << 7);
    pub const RESTRICT: SearchBehavior = SearchBehavior(1 << 8);
    pub const SEARCHES: SearchBehavior = SearchBehavior(1 << 9);

    pub const fn empty() -> Self {
        SearchBehavior(0)
    }

    pub fn contains(self, other: SearchBehavior) -> bool {
        self.0 & other.0 != 0
    }

    /// Enables a behavior. Typed implies history.
    pub fn insert(&mut self, other: SearchBehavior) {
        self.0 |= other.0;
        if other == Self::TYPED {
            self.0 |= Self::HISTORY.0;
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SearchBehavior {
    type Output = SearchBehavior;
    fn bitor(self, rhs: SearchBehavior) -> SearchBehavior {
        SearchBehavior(self.0 | rhs.0)
    }
}

/// Restriction characters typeable into the address bar. The first one found
/// while filtering tokens zeroes the default behavior and sets RESTRICT.
pub fn behavior_for_token(token: &str) -> Option<SearchBehavior> {
    match token {
        "^" => Some(SearchBehavior::HISTORY),
        "*" => Some(SearchBehavior::BOOKMARK),
        "+" => Some(SearchBehavior::TAG),
        "%" => Some(SearchBehavior::OPENPAGE),
        "~" => Some(SearchBehavior::TYPED),
        "$" => Some(SearchBehavior::SEARCHES),
        "#" => Some(SearchBehavior::TITLE),
        "@" => Some(SearchBehavior::URL),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Match types and actions
// ─────────────────────────────────────────────────────────────────────────────

/// The coarse class a match belongs to; drives bucket placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Heuristic,
    General,
    Suggestion,
    Extension,
}

impl MatchType {
    /// Re-derives the type of a row kept from a previous search from its
    /// style tags.
    pub fn from_style(style: &str) -> MatchType {
        if style.contains("heuristic") {
            MatchType::Heuristic
        } else if style.contains("suggestion") {
            MatchType::Suggestion
        } else if style.contains("extension") {
            MatchType::Extension
        } else {
            MatchType::General
        }
    }
}

/// A non-navigation result the UI must interpret, carried instead of a plain
/// URL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    #[serde(rename = "switchtab")]
    SwitchTab { url: String },
    #[serde(rename = "remotetab")]
    RemoteTab { url: String, device: String },
    #[serde(rename = "searchengine")]
    SearchEngine {
        engine: String,
        query: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
        input: String,
    },
    #[serde(rename = "keyword")]
    Keyword {
        url: String,
        input: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        post_data: Option<String>,
    },
    #[serde(rename = "visiturl")]
    VisitUrl { url: String, input: String },
    #[serde(rename = "extension")]
    ExtensionMatch { content: String, keyword: String },
}

impl Action {
    /// The URL this action ultimately targets, when it has one. Used for
    /// dedup so a switch-to-tab entry and a plain history entry for the same
    /// page collide.
    pub fn target_url(&self) -> Option<&str> {
        match self {
            Action::SwitchTab { url }
            | Action::RemoteTab { url, .. }
            | Action::Keyword { url, .. }
            | Action::VisitUrl { url, .. } => Some(url),
            Action::SearchEngine { .. } | Action::ExtensionMatch { .. } => None,
        }
    }

    pub fn is_switch_tab(&self) -> bool {
        matches!(self, Action::SwitchTab { .. })
    }

    pub fn is_tabish(&self) -> bool {
        matches!(self, Action::SwitchTab { .. } | Action::RemoteTab { .. })
    }

    /// Stable serialized form handed to result consumers as the row value.
    pub fn to_value_string(&self) -> String {
        // Serialization of this enum cannot fail.
        format!(
            "action:{}",
            serde_json::to_string(self).unwrap_or_default()
        )
    }
}

/// A candidate row produced by one of the sources, not yet deduped or
/// bucketed.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    /// Display/fill value. For action matches this is the serialized action.
    pub value: String,
    pub action: Option<Action>,
    pub comment: String,
    pub icon: String,
    pub style: String,
    pub match_type: MatchType,
    pub frecency: f64,
    pub place_id: Option<i64>,
    /// For autofill rows, the full URL the shortened value completes to.
    pub final_complete_value: String,
}

impl CandidateMatch {
    pub fn new(value: impl Into<String>, frecency: f64) -> Self {
        CandidateMatch {
            value: value.into(),
            action: None,
            comment: String::new(),
            icon: String::new(),
            style: String::new(),
            match_type: MatchType::General,
            frecency,
            place_id: None,
            final_complete_value: String::new(),
        }
    }

    pub fn with_action(action: Action, frecency: f64) -> Self {
        let value = action.to_value_string();
        let mut m = CandidateMatch::new(value, frecency);
        m.action = Some(action);
        m
    }
}

/// Favicon URL for a page, keyed on the host so the icon does not flicker
/// while the user keeps typing into the path.
pub fn icon_for_url(url: &str) -> String {
    const PROTOCOLS_WITH_ICONS: &[&str] =
        &["http:", "https:", "ftp:", "about:", "chrome:"];
    if PROTOCOLS_WITH_ICONS.iter().any(|p| url.starts_with(p)) {
        format!("page-icon:{}", url)
    } else {
        "default-favicon".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search input
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-supplied flags for a search, the typed equivalent of the legacy
/// space-delimited parameter string.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Include actions (switch-to-tab, search engine entries) in results.
    pub enable_actions: bool,
    /// Private window outside permanent private browsing: exclude
    /// privacy-sensitive results.
    pub disable_private_actions: bool,
    pub in_private_window: bool,
    pub prohibit_autofill: bool,
    pub user_context_id: i64,
}

/// The parsed, immutable form of what the user typed.
#[derive(Debug, Clone)]
pub struct SearchInput {
    /// The raw string, for case-sensitive comparisons.
    pub original: String,
    pub trimmed_original: String,
    /// The unescaped remainder after the scheme prefix was stripped.
    pub search_string: String,
    /// The stripped scheme prefix, lowercased ("http://", "about:", ...).
    pub stripped_prefix: String,
    /// Whitespace-split tokens with restriction tokens removed.
    pub tokens: Vec<String>,
    pub behavior: SearchBehavior,
    pub options: SearchOptions,
}

impl SearchInput {
    pub fn new(search_string: &str, options: SearchOptions, prefs: &PrefStore) -> Self {
        let original = search_string.to_string();
        let trimmed_original = original.trim().to_string();
        let (prefix, suffix) = split_prefix(&trimmed_original);
        let stripped_prefix = prefix.to_lowercase();
        let unescaped = unescape_for_display(suffix);

        let mut behavior = if unescaped.is_empty() {
            prefs.empty_search_default_behavior()
        } else {
            prefs.default_behavior()
        };

        let raw_tokens: Vec<String> = if unescaped.is_empty() {
            Vec::new()
        } else {
            unescaped.split_whitespace().map(str::to_string).collect()
        };
        let tokens = filter_tokens(raw_tokens, &mut behavior, options.enable_actions);

        SearchInput {
            original,
            trimmed_original,
            search_string: unescaped,
            stripped_prefix,
            tokens,
            behavior,
            options,
        }
    }

    /// Behavior check honoring the private-window exclusion of open pages.
    pub fn has_behavior(&self, flag: SearchBehavior) -> bool {
        if self.options.disable_private_actions && flag == SearchBehavior::OPENPAGE {
            return false;
        }
        self.behavior.contains(flag)
    }
}

/// Removes restriction tokens from the token list, updating the behavior.
/// The first restriction token found discards the default behavior and sets
/// RESTRICT so results are intersected with the restriction.
fn filter_tokens(
    mut tokens: Vec<String>,
    behavior: &mut SearchBehavior,
    enable_actions: bool,
) -> Vec<String> {
    let mut found_token = false;
    let mut i = tokens.len();
    while i > 0 {
        i -= 1;
        if let Some(flag) = behavior_for_token(&tokens[i]) {
            // The openpage token is an action, so it only applies when
            // actions are enabled.
            if flag == SearchBehavior::OPENPAGE && !enable_actions {
                continue;
            }
            if !found_token {
                found_token = true;
                *behavior = SearchBehavior::empty();
                behavior.insert(SearchBehavior::RESTRICT);
            }
            behavior.insert(flag);
            tokens.remove(i);
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::PrefStore;

    fn default_options() -> SearchOptions {
        SearchOptions { enable_actions: true, ..Default::default() }
    }

    #[test]
    fn test_behavior_typed_implies_history() {
        let mut b = SearchBehavior::empty();
        b.insert(SearchBehavior::TYPED);
        assert!(b.contains(SearchBehavior::HISTORY));
    }

    #[test]
    fn test_input_strips_prefix_and_tokenizes() {
        let prefs = PrefStore::new();
        let input = SearchInput::new("HTTP://Example.com foo", default_options(), &prefs);
        assert_eq!(input.stripped_prefix, "http://");
        assert_eq!(input.search_string, "Example.com foo");
        assert_eq!(input.tokens, vec!["Example.com", "foo"]);
    }

    #[test]
    fn test_restriction_token_replaces_default_behavior() {
        let prefs = PrefStore::new();
        let input = SearchInput::new("^ firefox", default_options(), &prefs);
        assert!(input.behavior.contains(SearchBehavior::RESTRICT));
        assert!(input.behavior.contains(SearchBehavior::HISTORY));
        assert!(!input.behavior.contains(SearchBehavior::BOOKMARK));
        assert_eq!(input.tokens, vec!["firefox"]);
    }

    #[test]
    fn test_typed_restriction_token_implies_history() {
        let prefs = PrefStore::new();
        let input = SearchInput::new("~ firefox", default_options(), &prefs);
        assert!(input.behavior.contains(SearchBehavior::TYPED));
        assert!(input.behavior.contains(SearchBehavior::HISTORY));
    }

    #[test]
    fn test_openpage_token_needs_actions() {
        let prefs = PrefStore::new();
        let opts = SearchOptions { enable_actions: false, ..Default::default() };
        let input = SearchInput::new("% firefox", opts, &prefs);
        // Token stays in the token list and behavior is untouched.
        assert_eq!(input.tokens, vec!["%", "firefox"]);
        assert!(!input.behavior.contains(SearchBehavior::RESTRICT));
    }

    #[test]
    fn test_empty_search_uses_empty_default_behavior() {
        let prefs = PrefStore::new();
        let input = SearchInput::new("", default_options(), &prefs);
        assert!(input.behavior.contains(SearchBehavior::RESTRICT));
        assert!(input.behavior.contains(SearchBehavior::HISTORY));
        assert!(input.behavior.contains(SearchBehavior::TYPED));
    }

    #[test]
    fn test_disable_private_actions_hides_openpage() {
        let prefs = PrefStore::new();
        let opts = SearchOptions {
            enable_actions: true,
            disable_private_actions: true,
            ..Default::default()
        };
        let input = SearchInput::new("firefox", opts, &prefs);
        assert!(!input.has_behavior(SearchBehavior::OPENPAGE));
        assert!(input.has_behavior(SearchBehavior::HISTORY));
    }

    #[test]
    fn test_action_value_round_trip() {
        let action = Action::SwitchTab { url: "http://example.com/".into() };
        let value = action.to_value_string();
        assert!(value.starts_with("action:"));
        let parsed: Action = serde_json::from_str(&value["action:".len()..]).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn test_match_type_from_style() {
        assert_eq!(MatchType::from_style("action searchengine heuristic"), MatchType::Heuristic);
        assert_eq!(MatchType::from_style("action searchengine suggestion"), MatchType::Suggestion);
        assert_eq!(MatchType::from_style("action extension"), MatchType::Extension);
        assert_eq!(MatchType::from_style("favicon"), MatchType::General);
    }
}
