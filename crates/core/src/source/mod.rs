//! Read access to the relational source of legacy user records.
//!
//! [`SourceStore`] is the capability the orchestrator consumes;
//! [`SqliteSourceStore`] is the concrete backend. [`RecordCursor`] pages
//! through any store in primary-key order.

pub mod sqlite;

use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::SourceError;
use crate::models::SourceUserRecord;

pub use sqlite::SqliteSourceStore;

/// A row that was read but has no usable primary key, so it cannot be keyed
/// into the outcome logs. The rest of its page is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// Absolute position of the row in primary-key order.
    pub position: u64,
    /// Email column of the row, empty when absent.
    pub email: String,
    pub reason: String,
}

impl RejectedRow {
    /// Source id charged with the failure of an unkeyed row.
    pub const SOURCE_ID: i64 = 0;
}

impl std::fmt::Display for RejectedRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source row {}: {}", self.position, self.reason)
    }
}

/// One row of a page: a usable record, or the reason it is not one.
pub type SourceRow = Result<SourceUserRecord, RejectedRow>;

/// Read-only view of the legacy user table.
pub trait SourceStore: Send + Sync {
    /// Total number of records. Advisory only: it may change between calls
    /// and is never used to decide when paging stops.
    fn count(&self) -> Result<u64, SourceError>;

    /// Rows ordered by primary key, starting at `offset`. A malformed row is
    /// returned in place as a [`RejectedRow`]; `Err` means the page itself
    /// could not be read.
    fn page(&self, offset: u64, limit: u32) -> Result<Vec<SourceRow>, SourceError>;

    fn find_by_id(&self, id: i64) -> Result<Option<SourceUserRecord>, SourceError>;

    fn find_by_email(&self, email: &str) -> Result<Option<SourceUserRecord>, SourceError>;
}

/// Summary figures about the source table.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub total_users: u64,
    pub confirmed_users: u64,
    pub unconfirmed_users: u64,
    /// Users per legacy level; `None` collects rows without a level.
    pub users_by_level: BTreeMap<Option<i64>, u64>,
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Lazy offset/limit pager over a [`SourceStore`].
///
/// An empty page is the only termination signal. The cursor can be restarted
/// at any offset, so an interrupted run can resume where it stopped.
pub struct RecordCursor<'a> {
    store: &'a dyn SourceStore,
    offset: u64,
    limit: u32,
    exhausted: bool,
}

impl<'a> RecordCursor<'a> {
    pub fn new(store: &'a dyn SourceStore, limit: u32) -> Self {
        Self::starting_at(store, 0, limit)
    }

    pub fn starting_at(store: &'a dyn SourceStore, offset: u64, limit: u32) -> Self {
        Self {
            store,
            offset,
            limit: limit.max(1),
            exhausted: false,
        }
    }

    /// Offset of the next page to be fetched.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fetch the next page. Returns `Ok(None)` once the store hands back an
    /// empty page; every later call also returns `Ok(None)`. A page holding
    /// only rejected rows is not empty.
    pub fn next_batch(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let batch = self.store.page(self.offset, self.limit)?;
        if batch.is_empty() {
            debug!(offset = self.offset, "source exhausted");
            self.exhausted = true;
            return Ok(None);
        }
        debug!(offset = self.offset, count = batch.len(), "fetched source page");
        self.offset += u64::from(self.limit);
        Ok(Some(batch))
    }
}
