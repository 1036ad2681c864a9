//! List pagination for the `offset`/`limit` and `page`/`limit` query styles.

use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_LIMIT: i64 = 15;

/// Pagination query parameters accepted by every list route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

////////////////////////////////////////// ApiPagination //////////////////////////////////////////

/// Page-numbered pagination with navigation helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiPagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl ApiPagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
            total: 0,
        }
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = total.max(0);
        self
    }

    pub fn sql_offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self) -> i64 {
        if self.total < self.limit {
            return 1;
        }
        (self.total + self.limit - 1) / self.limit
    }

    pub fn previous_page(&self) -> i64 {
        (self.page - 1).max(1)
    }

    pub fn next_page(&self) -> i64 {
        let next = self.page.saturating_add(1);
        if next > self.total_pages() {
            self.total_pages()
        } else {
            next
        }
    }

    pub fn is_last_page(&self) -> bool {
        self.total_pages() == self.page
    }

    /// The first three page numbers that exist.
    pub fn first_range(&self) -> Vec<i64> {
        let total_pages = self.total_pages();
        (1..=3).filter(|page| *page <= total_pages).collect()
    }

    /// The final three page numbers, when there are more than three pages.
    pub fn last_range(&self) -> Vec<i64> {
        let total_pages = self.total_pages();
        if total_pages <= 3 {
            return Vec::new();
        }
        (total_pages - 2..=total_pages)
            .filter(|page| *page > 3)
            .collect()
    }
}

//////////////////////////////////////////// Pagination ////////////////////////////////////////////

/// The pagination a list request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    Offset { offset: i64, limit: i64 },
    Page(ApiPagination),
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::Offset {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl From<&PageQuery> for Pagination {
    fn from(query: &PageQuery) -> Self {
        match query.page {
            Some(page) => Pagination::Page(ApiPagination::new(
                page,
                clamp_limit(query.limit, DEFAULT_PAGE_LIMIT),
            )),
            None => Pagination::Offset {
                offset: query.offset.unwrap_or(0).max(0),
                limit: clamp_limit(query.limit, DEFAULT_LIMIT),
            },
        }
    }
}

impl Pagination {
    /// The SQL `OFFSET` for the request.
    pub fn offset(&self) -> i64 {
        match self {
            Pagination::Offset { offset, .. } => *offset,
            Pagination::Page(page) => page.sql_offset(),
        }
    }

    /// The SQL `LIMIT` for the request.
    pub fn limit(&self) -> i64 {
        match self {
            Pagination::Offset { limit, .. } => *limit,
            Pagination::Page(page) => page.limit,
        }
    }

    /// Renders the list `meta` member for `total` matching rows.
    pub fn meta(&self, total: i64) -> Value {
        let mut meta = json!({
            "offset": self.offset(),
            "limit": self.limit(),
            "count": total,
        });
        if let Pagination::Page(page) = self {
            let page = page.with_total(total);
            meta["page"] = json!(page.page);
            meta["totalPages"] = json!(page.total_pages());
            meta["isLastPage"] = json!(page.is_last_page());
        }
        meta
    }
}
