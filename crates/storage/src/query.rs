use common::{OrderStatus, UserId};

use crate::records::OrderRecord;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Builder for constructing order listing queries.
///
/// Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Only orders placed by this user.
    pub user_id: Option<UserId>,

    /// Only orders in this status.
    pub status: Option<OrderStatus>,

    /// Maximum number of orders to return.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,
}

impl OrderQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one user's orders.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    /// Filters by status.
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Limits the number of orders returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many orders before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Page size after applying the default and the upper bound.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Returns true if the record passes the filters (pagination aside).
    pub fn matches(&self, order: &OrderRecord) -> bool {
        self.user_id.is_none_or(|u| order.user_id == Some(u))
            && self.status.is_none_or(|s| order.status == s)
    }
}

/// One page of orders plus the total number of matches.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_for_user() {
        let id = UserId::new();
        let query = OrderQuery::for_user(id);

        assert_eq!(query.user_id, Some(id));
        assert!(query.status.is_none());
    }

    #[test]
    fn query_builder_chain() {
        let query = OrderQuery::new()
            .status(OrderStatus::Pending)
            .limit(10)
            .offset(30);

        assert_eq!(query.status, Some(OrderStatus::Pending));
        assert_eq!(query.effective_limit(), 10);
        assert_eq!(query.effective_offset(), 30);
    }

    #[test]
    fn limit_is_defaulted_and_clamped() {
        assert_eq!(OrderQuery::new().effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(OrderQuery::new().limit(0).effective_limit(), 1);
        assert_eq!(OrderQuery::new().limit(10_000).effective_limit(), MAX_PAGE_SIZE);
    }
}
