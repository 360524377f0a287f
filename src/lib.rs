//! Address-bar autocomplete engine: multi-source, frecency-ranked,
//! incrementally notified.
//!
//! One [`OmniboxEngine`] serves a session. Each keystroke starts a
//! [`search::Search`] that cancels the previous one, runs a heuristic
//! cascade for the top match, then fills the rest of the visible slots
//! from the places store, open pages, remote tabs, search suggestions
//! and extension keywords, deduplicated and bucketed by match type.

pub mod engine;
pub mod fixup;
pub mod index;
pub mod interface;
pub mod models;
pub mod prefs;
pub mod providers;
pub mod ranking;
pub mod search;
pub mod store;

pub use engine::OmniboxEngine;
pub use index::{FrecencyIndex, IndexError, SwitchToTabRegistry};
pub use interface::{
    OmniboxError, OmniboxResult, ResultBuffer, SearchObserver, SearchResultCode, SinkRow,
};
pub use models::{Action, MatchType, SearchBehavior, SearchInput, SearchOptions};
pub use prefs::{InsertMethod, MatchBehavior, PrefStore};
pub use providers::Providers;
pub use store::{PageEntry, PlacesStore, StoreError};
