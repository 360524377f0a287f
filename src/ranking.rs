//! Bucketed insertion and dedup of candidate matches.
//!
//! Matches arrive from concurrent sources in arbitrary order but must render
//! in a stable layout: results are placed into typed buckets (heuristic
//! first, then extension, then the configured middle, then catch-all
//! suggestion/general tails). Rows inherited from the previous search are
//! replaced in place while a bucket still holds unclaimed inherited rows,
//! so the visible list does not flicker while new results stream in.

use std::collections::HashSet;
use std::sync::Arc;

use crate::interface::{ResultBuffer, SinkRow};
use crate::fixup::strip_http_and_trim;
use crate::models::{Action, CandidateMatch, MatchType};
use crate::prefs::BucketPlan;

/// Dedup key for a match: the target URL normalized, plus the action when it
/// is a tab-style one (those participate in the replace-upgrade rule).
pub fn dedup_key(m: &CandidateMatch) -> (String, Option<Action>) {
    if let Some(action) = &m.action {
        if let Some(url) = action.target_url() {
            return (strip_http_and_trim(url, true), Some(action.clone()));
        }
    }
    // Autofill values may be trimmed, so key those on the full URL they
    // complete to.
    let url = if m.style.contains("autofill") {
        &m.final_complete_value
    } else {
        &m.value
    };
    (strip_http_and_trim(url, true), None)
}

#[derive(Debug)]
struct BucketSlot {
    match_type: MatchType,
    /// Remaining capacity; `usize::MAX` means unbounded.
    available: usize,
    /// Index of the first slot not yet claimed by the current search.
    insert_index: usize,
    /// Rows in the bucket, inherited ones included.
    count: usize,
}

#[derive(Debug, Clone)]
struct UsedUrl {
    key: String,
    action: Option<Action>,
    match_type: MatchType,
}

fn type_index(t: MatchType) -> usize {
    match t {
        MatchType::Heuristic => 0,
        MatchType::General => 1,
        MatchType::Suggestion => 2,
        MatchType::Extension => 3,
    }
}

/// Accumulates the matches of one search into a shared [`ResultBuffer`].
pub struct MatchSink {
    buffer: Arc<ResultBuffer>,
    /// Materialized on first insertion; the plan depends on whether the
    /// heuristic match is a search engine result.
    buckets: Option<Vec<BucketSlot>>,
    /// Types of the rows inherited from the previous search, in row order.
    previous_types: Vec<MatchType>,
    /// Dedup bookkeeping, index-aligned with the buffer rows. Inherited
    /// rows hold `None` and never block a new match.
    used_urls: Vec<Option<UsedUrl>>,
    used_place_ids: HashSet<i64>,
    counts: [usize; 4],
    current_match_count: usize,
    max_rich_results: usize,
    general_plan: BucketPlan,
    search_plan: BucketPlan,
}

impl MatchSink {
    pub fn new(
        buffer: Arc<ResultBuffer>,
        previous_types: Vec<MatchType>,
        general_plan: BucketPlan,
        search_plan: BucketPlan,
        max_rich_results: usize,
    ) -> Self {
        let used_urls = vec![None; buffer.row_count()];
        MatchSink {
            buffer,
            buckets: None,
            previous_types,
            used_urls,
            used_place_ids: HashSet::new(),
            counts: [0; 4],
            current_match_count: 0,
            max_rich_results,
            general_plan,
            search_plan,
        }
    }

    pub fn buffer(&self) -> &Arc<ResultBuffer> {
        &self.buffer
    }

    /// Matches of the given type added by the current search.
    pub fn count(&self, t: MatchType) -> usize {
        self.counts[type_index(t)]
    }

    pub fn current_match_count(&self) -> usize {
        self.current_match_count
    }

    pub fn previous_type_set(&self) -> HashSet<MatchType> {
        self.previous_types.iter().copied().collect()
    }

    pub fn has_previous_matches(&self) -> bool {
        !self.previous_types.is_empty()
    }

    /// Inserts a match, deduping and bucketing it. Returns the inserted
    /// type, or `None` when the match was discarded (duplicate or the
    /// result set is full).
    pub fn add(&mut self, m: CandidateMatch) -> Option<MatchType> {
        if self.current_match_count >= self.max_rich_results {
            return None;
        }

        let (key, action) = dedup_key(&m);
        let (index, replace) = self.insert_index_for(&m, key, action)?;

        let row = SinkRow {
            value: m.value,
            comment: m.comment,
            icon: m.icon,
            style: m.style,
            final_complete_value: m.final_complete_value,
        };
        if replace {
            self.buffer.remove_row_at(index);
        }
        self.buffer.insert_row_at(index, row);

        self.current_match_count += 1;
        self.counts[type_index(m.match_type)] += 1;
        Some(m.match_type)
    }

    fn insert_index_for(
        &mut self,
        m: &CandidateMatch,
        key: String,
        action: Option<Action>,
    ) -> Option<(usize, bool)> {
        // Check both the place id and the url: keyword matches rewrite their
        // url with the typed terms, so the id is the only stable handle.
        let seen = m
            .place_id
            .map_or(false, |id| self.used_place_ids.contains(&id))
            || self.used_urls.iter().flatten().any(|u| u.key == key);
        if seen {
            let mut is_dupe = true;
            if let Some(a) = &action {
                if a.is_tabish() {
                    for i in 0..self.used_urls.len() {
                        let Some(existing) = self.used_urls[i].clone() else {
                            continue;
                        };
                        if existing.key != key {
                            continue;
                        }
                        is_dupe = true;
                        // A heuristic match and a switch-to-tab match for
                        // the same page may coexist; keep scanning so at
                        // most one extra copy is inserted.
                        if existing.match_type == MatchType::Heuristic && a.is_switch_tab() {
                            is_dupe = false;
                            continue;
                        }
                        // Upgrade in place: a tab action wins over a plain
                        // entry, and switch-to-tab wins over remote tab. An
                        // identical tab action is a plain duplicate.
                        let existing_is_switch = existing
                            .action
                            .as_ref()
                            .is_some_and(Action::is_switch_tab);
                        if existing.action.is_none()
                            || (a.is_switch_tab() && !existing_is_switch)
                        {
                            self.used_urls[i] = Some(UsedUrl {
                                key,
                                action: action.clone(),
                                match_type: m.match_type,
                            });
                            return Some((i, true));
                        }
                        break;
                    }
                }
            }
            if is_dupe {
                return None;
            }
        }

        if let Some(id) = m.place_id {
            self.used_place_ids.insert(id);
        }

        self.materialize_buckets(m);
        let buckets = self.buckets.as_mut().expect("buckets materialized");

        let mut index = 0;
        let mut replace = false;
        for bucket in buckets.iter_mut() {
            if m.match_type != bucket.match_type || bucket.available == 0 {
                index += bucket.count;
                continue;
            }
            index += bucket.insert_index;
            if bucket.available != usize::MAX {
                bucket.available -= 1;
            }
            if bucket.insert_index < bucket.count {
                replace = true;
            } else {
                bucket.count += 1;
            }
            bucket.insert_index += 1;
            break;
        }

        let entry = UsedUrl { key, action, match_type: m.match_type };
        if replace {
            self.used_urls[index] = Some(entry);
        } else {
            let at = index.min(self.used_urls.len());
            self.used_urls.insert(at, Some(entry));
        }
        Some((index, replace))
    }

    /// Freezes the bucket plan on first insertion and pre-seeds the buckets
    /// with the rows inherited from the previous search, capped at each
    /// bucket's capacity, so new arrivals replace them in place.
    fn materialize_buckets(&mut self, m: &CandidateMatch) {
        if self.buckets.is_some() {
            return;
        }
        let plan = if m.match_type == MatchType::Heuristic && m.style.contains("searchengine") {
            &self.search_plan
        } else {
            &self.general_plan
        };
        let mut buckets: Vec<BucketSlot> = plan
            .iter()
            .map(|&(match_type, available)| BucketSlot {
                match_type,
                available,
                insert_index: 0,
                count: 0,
            })
            .collect();
        for t in &self.previous_types {
            for bucket in buckets.iter_mut() {
                if *t == bucket.match_type && bucket.count < bucket.available {
                    bucket.count += 1;
                    break;
                }
            }
        }
        self.buckets = Some(buckets);
    }

    /// Removes rows of the given type that were inherited from the previous
    /// search but not re-confirmed by this one. Returns whether anything was
    /// removed.
    pub fn clean_up_non_current(&mut self, match_type: MatchType) -> bool {
        if self.previous_types.is_empty() {
            return false;
        }
        let mut changed = false;
        match self.buckets.as_mut() {
            None => {
                // No match arrived yet, so inherited rows of this type still
                // sit at the head of the list.
                while self.previous_types.first() == Some(&match_type) {
                    self.previous_types.remove(0);
                    self.buffer.remove_row_at(0);
                    if !self.used_urls.is_empty() {
                        self.used_urls.remove(0);
                    }
                    changed = true;
                }
            }
            Some(buckets) => {
                let mut index = 0;
                for bucket in buckets.iter_mut() {
                    if bucket.match_type != match_type {
                        index += bucket.count;
                        continue;
                    }
                    index += bucket.insert_index;
                    while bucket.count > bucket.insert_index {
                        self.buffer.remove_row_at(index);
                        if index < self.used_urls.len() {
                            self.used_urls.remove(index);
                        }
                        bucket.count -= 1;
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}
