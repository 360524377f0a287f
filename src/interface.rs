//! Public protocol surface: the result buffer consumers observe, result
//! codes, and the crate error type.

use parking_lot::Mutex;
use thiserror::Error;

/// State of a result set as seen by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResultCode {
    /// Matches present, more may still arrive.
    SuccessOngoing,
    /// No matches yet, more may still arrive.
    NoMatchOngoing,
    Success,
    NoMatch,
}

impl SearchResultCode {
    pub fn is_ongoing(self) -> bool {
        matches!(
            self,
            SearchResultCode::SuccessOngoing | SearchResultCode::NoMatchOngoing
        )
    }
}

/// One displayable row in the result set.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRow {
    pub value: String,
    pub comment: String,
    pub icon: String,
    pub style: String,
    /// For autofill rows, the full URL the value completes to.
    pub final_complete_value: String,
}

#[derive(Debug)]
struct BufferInner {
    search_string: String,
    rows: Vec<SinkRow>,
    default_index: Option<usize>,
    code: SearchResultCode,
}

/// Ordered result rows for one search, shared between the running search
/// (the single writer) and its observer. A new related search may inherit
/// the previous buffer so rows are replaced in place instead of flickering.
#[derive(Debug)]
pub struct ResultBuffer {
    inner: Mutex<BufferInner>,
}

impl ResultBuffer {
    pub fn new(search_string: impl Into<String>) -> Self {
        ResultBuffer {
            inner: Mutex::new(BufferInner {
                search_string: search_string.into(),
                rows: Vec::new(),
                default_index: None,
                code: SearchResultCode::NoMatchOngoing,
            }),
        }
    }

    /// Rebinds an inherited buffer to the new search string and resets the
    /// default index; rows are kept for in-place replacement.
    pub fn rebind(&self, search_string: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.search_string = search_string.into();
        inner.default_index = None;
        inner.code = SearchResultCode::NoMatchOngoing;
    }

    pub fn search_string(&self) -> String {
        self.inner.lock().search_string.clone()
    }

    pub fn row_count(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn row_at(&self, index: usize) -> Option<SinkRow> {
        self.inner.lock().rows.get(index).cloned()
    }

    pub fn rows(&self) -> Vec<SinkRow> {
        self.inner.lock().rows.clone()
    }

    /// Style tags of every row, used to re-derive the match types of rows
    /// inherited from the previous search.
    pub fn styles(&self) -> Vec<String> {
        self.inner.lock().rows.iter().map(|r| r.style.clone()).collect()
    }

    pub fn insert_row_at(&self, index: usize, row: SinkRow) {
        let mut inner = self.inner.lock();
        let index = index.min(inner.rows.len());
        inner.rows.insert(index, row);
    }

    pub fn remove_row_at(&self, index: usize) {
        let mut inner = self.inner.lock();
        if index < inner.rows.len() {
            inner.rows.remove(index);
        }
    }

    pub fn set_default_index(&self, index: Option<usize>) {
        self.inner.lock().default_index = index;
    }

    pub fn default_index(&self) -> Option<usize> {
        self.inner.lock().default_index
    }

    pub fn set_code(&self, code: SearchResultCode) {
        self.inner.lock().code = code;
    }

    pub fn code(&self) -> SearchResultCode {
        self.inner.lock().code
    }
}

/// Receiver for incremental result notifications. Called on the runtime
/// worker driving the search, so implementations must be quick.
pub trait SearchObserver: Send + Sync {
    fn on_search_result(&self, result: &ResultBuffer);
}

/// Error type for omnibox operations.
#[derive(Debug, Error)]
pub enum OmniboxError {
    #[error("store error: {0}")]
    Store(String),
    #[error("index error: {0}")]
    Index(#[from] crate::index::IndexError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub type OmniboxResult<T> = Result<T, OmniboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: &str) -> SinkRow {
        SinkRow {
            value: value.into(),
            comment: String::new(),
            icon: String::new(),
            style: "favicon".into(),
            final_complete_value: String::new(),
        }
    }

    #[test]
    fn test_insert_and_remove_rows() {
        let buf = ResultBuffer::new("moz");
        buf.insert_row_at(0, row("a"));
        buf.insert_row_at(1, row("c"));
        buf.insert_row_at(1, row("b"));
        assert_eq!(
            buf.rows().iter().map(|r| r.value.clone()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        buf.remove_row_at(1);
        assert_eq!(buf.row_count(), 2);
        assert_eq!(buf.row_at(1).unwrap().value, "c");
    }

    #[test]
    fn test_insert_past_end_appends() {
        let buf = ResultBuffer::new("moz");
        buf.insert_row_at(10, row("a"));
        assert_eq!(buf.row_count(), 1);
    }

    #[test]
    fn test_rebind_keeps_rows() {
        let buf = ResultBuffer::new("moz");
        buf.insert_row_at(0, row("a"));
        buf.set_default_index(Some(0));
        buf.set_code(SearchResultCode::Success);
        buf.rebind("mozil");
        assert_eq!(buf.search_string(), "mozil");
        assert_eq!(buf.row_count(), 1);
        assert_eq!(buf.default_index(), None);
        assert!(buf.code().is_ongoing());
    }
}
