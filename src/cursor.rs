//! Cursor policy: which rows a run reads, and how the watermark advances.
//!
//! The watermark advances to the time a run *completed*, captured after every
//! dispatched batch has been joined. A row written while the run was in
//! progress therefore has a watermark value below the new cursor; if the page
//! holding it had already been read, it is only picked up again once it is
//! modified. Re-reading rows is harmless (documents are upserted by primary
//! key), so the choice trades a smaller re-read window for that gap.

use crate::config::Cursor;
use crate::source::Watermark;
use chrono::{DateTime, Utc};

/// Effective lower bound for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    /// No watermark column: every run is a full scan
    Disabled,
    /// Watermark column set but cursor at zero: read everything
    FromBeginning,
    /// Only rows with `column > after`
    After(DateTime<Utc>),
}

/// Outcome of resolving a cursor for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorResolution {
    /// Lower bound to read from
    pub bound: Bound,
    /// The stored cursor was discarded because the index is being dropped
    pub reset: bool,
}

impl CursorResolution {
    /// Source filter for this run, if any.
    pub fn watermark(&self, cursor: &Cursor) -> Option<Watermark> {
        match self.bound {
            Bound::After(after) => Some(Watermark {
                column: cursor.column.clone(),
                after,
            }),
            Bound::Disabled | Bound::FromBeginning => None,
        }
    }

    /// Whether the run reads every row of the source table.
    pub fn is_full_scan(&self) -> bool {
        !matches!(self.bound, Bound::After(_))
    }
}

/// Decides the read boundary of a run and advances it afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorPolicy;

impl CursorPolicy {
    /// Resolve the lower bound for a run.
    ///
    /// Dropping the destination index invalidates earlier progress, so with
    /// `drop` set the stored cursor is ignored.
    pub fn resolve(cursor: &Cursor, drop: bool) -> CursorResolution {
        if !cursor.is_enabled() {
            return CursorResolution {
                bound: Bound::Disabled,
                reset: false,
            };
        }

        let reset = drop;
        let bound = match cursor.last_sync {
            Some(ts) if !drop => Bound::After(ts),
            _ => Bound::FromBeginning,
        };

        CursorResolution { bound, reset }
    }

    /// Move the cursor to `completed_at`. Returns whether anything changed.
    pub fn advance(cursor: &mut Cursor, completed_at: DateTime<Utc>) -> bool {
        if !cursor.is_enabled() {
            return false;
        }
        cursor.last_sync = Some(completed_at);
        true
    }
}
