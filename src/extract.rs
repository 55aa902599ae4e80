//! Paginated extraction of source rows.
//!
//! Pages are read with `LIMIT`/`OFFSET` ordered by the primary key. Offset
//! paging is not stable under concurrent writes: a row inserted into or
//! deleted from an already-read range shifts later pages, so a row can be
//! skipped or read twice in that run. The next run's cursor window covers
//! modified rows again; deletions are never propagated.

use crate::document::Batch;
use crate::error::Result;
use crate::source::{PageQuery, RowSource, Watermark};
use tracing::debug;

/// Lazy, finite, non-restartable sequence of pages.
///
/// The sequence ends at the first empty page. After it ends, or after a page
/// query fails, every further call to [`Extractor::next_batch`] returns
/// `Ok(None)`.
pub struct Extractor<'a> {
    source: &'a dyn RowSource,
    query: PageQuery,
    finished: bool,
    pages: usize,
    rows: usize,
}

impl<'a> Extractor<'a> {
    /// Page through `table` ordered by `order_by`, `page_size` rows at a time.
    pub fn new(
        source: &'a dyn RowSource,
        table: impl Into<String>,
        order_by: impl Into<String>,
        watermark: Option<Watermark>,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            query: PageQuery {
                table: table.into(),
                order_by: order_by.into(),
                watermark,
                limit: page_size.max(1),
                offset: 0,
            },
            finished: false,
            pages: 0,
            rows: 0,
        }
    }

    /// Fetch the next page, or `None` once the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }

        let batch = match self.source.fetch_page(&self.query).await {
            Ok(batch) => batch,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        if batch.is_empty() {
            debug!(
                table = %self.query.table,
                pages = self.pages,
                rows = self.rows,
                "Extraction finished"
            );
            self.finished = true;
            return Ok(None);
        }

        self.pages += 1;
        self.rows += batch.len();
        self.query.offset += self.query.limit;
        Ok(Some(batch))
    }

    /// Rows yielded so far.
    pub fn rows_extracted(&self) -> usize {
        self.rows
    }

    /// Non-empty pages yielded so far.
    pub fn pages_extracted(&self) -> usize {
        self.pages
    }

    /// Whether the sequence has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
