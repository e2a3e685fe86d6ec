//! Movement query types shared by every store backend.
//!
//! All history queries are paginated; reports read a bounded date range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId};
use stockledger_inventory::{MovementKind, StockMovement};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Validate caller input. Missing values fall back to defaults and the page
    /// size is capped at [`MAX_PAGE_SIZE`].
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> DomainResult<Self> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(DomainError::validation("page", "must be at least 1"));
        }
        if page_size == 0 {
            return Err(DomainError::validation("pageSize", "must be at least 1"));
        }
        Ok(Self {
            page,
            page_size: page_size.min(MAX_PAGE_SIZE),
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

/// Result ordering over the ledger key (`created_at`, `id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOrder {
    NewestFirst,
    OldestFirst,
}

/// Filter criteria for movement queries. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub kind: Option<MovementKind>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| p == movement.product_id)
            && self.kind.is_none_or(|k| k == movement.kind)
            && self.created_from.is_none_or(|from| movement.created_at >= from)
            && self.created_to.is_none_or(|to| movement.created_at <= to)
    }
}

/// One page of movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPage {
    pub movements: Vec<StockMovement>,
    pub page: u32,
    pub page_size: u32,
    /// Movements matching the filter across all pages.
    pub total: u64,
    pub total_pages: u64,
}

impl MovementPage {
    pub fn new(movements: Vec<StockMovement>, pagination: Pagination, total: u64) -> Self {
        Self {
            movements,
            page: pagination.page,
            page_size: pagination.page_size,
            total,
            total_pages: total.div_ceil(u64::from(pagination.page_size)),
        }
    }

    pub fn has_more(&self) -> bool {
        u64::from(self.page) < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        assert_eq!(Pagination::new(None, None).unwrap(), Pagination::default());
        assert_eq!(Pagination::new(Some(2), Some(5000)).unwrap().page_size, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(Some(3), Some(20)).unwrap().offset(), 40);
    }

    #[test]
    fn pagination_rejects_zero() {
        assert!(matches!(
            Pagination::new(Some(0), None),
            Err(DomainError::Validation { ref field, .. }) if field == "page"
        ));
        assert!(matches!(
            Pagination::new(None, Some(0)),
            Err(DomainError::Validation { ref field, .. }) if field == "pageSize"
        ));
    }

    #[test]
    fn page_counts_round_up() {
        let p = Pagination::new(Some(1), Some(10)).unwrap();
        let page = MovementPage::new(vec![], p, 21);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_more());

        let empty = MovementPage::new(vec![], p, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more());
    }
}
