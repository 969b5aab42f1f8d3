mod records;

pub use records::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::PaginationConfig,
    db::error::{DbError, DbResult},
};

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (oldest first)
    Asc,
    /// Descending order (newest first)
    #[default]
    Desc,
}

impl SortOrder {
    /// Get the SQL ORDER BY direction string.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Pagination as requested by a caller, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of records to return. Defaults to the configured limit.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of records to skip. Defaults to 0.
    #[serde(default)]
    pub offset: Option<i64>,
}

impl PageRequest {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self { limit, offset }
    }

    /// Apply defaults and check bounds.
    ///
    /// A limit outside `[1, max_limit]` or a negative offset is rejected
    /// with [`DbError::InvalidPagination`].
    pub fn resolve(&self, config: &PaginationConfig) -> DbResult<Page> {
        let limit = self.limit.unwrap_or(config.default_limit);
        if limit < 1 || limit > config.max_limit {
            return Err(DbError::InvalidPagination(format!(
                "limit must be between 1 and {}, got {}",
                config.max_limit, limit
            )));
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(DbError::InvalidPagination(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }

        Ok(Page { limit, offset })
    }
}

/// Validated limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// One page of rows plus the total number of matching rows.
#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, total: i64) -> Self {
        Self { items, total }
    }
}

/// Pagination metadata returned alongside listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

impl PageInfo {
    pub fn new(page: Page, returned: usize, total: i64) -> Self {
        Self {
            limit: page.limit,
            offset: page.offset,
            total,
            has_more: page.offset + (returned as i64) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PaginationConfig {
        PaginationConfig::default()
    }

    #[test]
    fn test_defaults_applied() {
        let page = PageRequest::default().resolve(&config()).unwrap();
        assert_eq!(page, Page { limit: 50, offset: 0 });
    }

    #[test]
    fn test_bounds_accepted() {
        let cfg = config();
        assert!(PageRequest::new(Some(1), Some(0)).resolve(&cfg).is_ok());
        assert!(PageRequest::new(Some(100), Some(1_000)).resolve(&cfg).is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let cfg = config();
        for request in [
            PageRequest::new(Some(0), None),
            PageRequest::new(Some(101), None),
            PageRequest::new(Some(-5), None),
            PageRequest::new(None, Some(-1)),
        ] {
            assert!(
                matches!(request.resolve(&cfg), Err(DbError::InvalidPagination(_))),
                "{:?} should be rejected",
                request
            );
        }
    }

    #[test]
    fn test_page_info_has_more() {
        let page = Page { limit: 10, offset: 10 };
        assert!(PageInfo::new(page, 10, 25).has_more);
        assert!(!PageInfo::new(page, 10, 20).has_more);
        assert!(!PageInfo::new(page, 0, 5).has_more);
    }

    #[test]
    fn test_sort_order() {
        assert_eq!(SortOrder::default(), SortOrder::Desc);
        assert_eq!(SortOrder::Asc.as_sql(), "ASC");
    }
}
