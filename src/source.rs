//! Source capability: bounded, ordered row-range queries.

use crate::document::Batch;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One bounded page of a source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Source table
    pub table: String,
    /// Stable sort key used for paging
    pub order_by: String,
    /// Only rows whose watermark column is strictly after this time
    pub watermark: Option<Watermark>,
    /// Page size
    pub limit: usize,
    /// Rows to skip
    pub offset: usize,
}

/// Watermark filter: `column > after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    /// Watermark column
    pub column: String,
    /// Exclusive lower bound
    pub after: DateTime<Utc>,
}

impl PageQuery {
    /// SQL text for this page. The watermark bound, when present, is `$1`.
    pub fn to_sql(&self) -> String {
        self.to_sql_selecting("*")
    }

    /// Same as [`to_sql`](Self::to_sql) with an explicit select list.
    pub fn to_sql_selecting(&self, columns: &str) -> String {
        let mut sql = format!("SELECT {} FROM {}", columns, self.table);
        if let Some(ref w) = self.watermark {
            sql.push_str(&format!(" WHERE {} > $1::timestamptz", w.column));
        }
        sql.push_str(&format!(
            " ORDER BY {} LIMIT {} OFFSET {}",
            self.order_by, self.limit, self.offset
        ));
        sql
    }
}

/// Executes page queries against a source table.
///
/// Implementations must be safe to share between indexes processed by the
/// same run.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch one page. An empty batch means the range is exhausted.
    async fn fetch_page(&self, query: &PageQuery) -> Result<Batch>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sql_without_watermark() {
        let q = PageQuery {
            table: "users".into(),
            order_by: "id".into(),
            watermark: None,
            limit: 10,
            offset: 20,
        };
        assert_eq!(q.to_sql(), "SELECT * FROM users ORDER BY id LIMIT 10 OFFSET 20");
    }

    #[test]
    fn test_sql_with_watermark() {
        let q = PageQuery {
            table: "public.users".into(),
            order_by: "id".into(),
            watermark: Some(Watermark {
                column: "updated_at".into(),
                after: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            }),
            limit: 500,
            offset: 0,
        };
        assert_eq!(
            q.to_sql(),
            "SELECT * FROM public.users WHERE updated_at > $1::timestamptz ORDER BY id LIMIT 500 OFFSET 0"
        );
    }

    #[test]
    fn test_sql_keeps_quoted_identifiers() {
        let q = PageQuery {
            table: "public.\"User\"".into(),
            order_by: "\"userId\"".into(),
            watermark: Some(Watermark {
                column: "\"updatedAt\"".into(),
                after: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            }),
            limit: 100,
            offset: 200,
        };
        assert_eq!(
            q.to_sql_selecting("\"userId\", to_jsonb(\"mood\") AS \"mood\""),
            "SELECT \"userId\", to_jsonb(\"mood\") AS \"mood\" FROM public.\"User\" \
             WHERE \"updatedAt\" > $1::timestamptz ORDER BY \"userId\" LIMIT 100 OFFSET 200"
        );
    }
}
