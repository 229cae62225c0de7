//! HTTP handlers and the state they share.

pub mod admin;
pub mod cart;
pub mod checkout;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod webhooks;

use std::sync::Arc;

use ::checkout::{CheckoutOrchestrator, PaymentGateway};
use axum::http::HeaderMap;
use common::{OrderId, SessionId, UserId};
use domain::Order;
use storage::Storage;

use crate::error::ApiError;

/// Header naming the shopper's cart session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Header carrying the authenticated user, set by the auth layer in front.
pub const USER_HEADER: &str = "x-user-id";

/// Header carrying the admin token.
pub const ADMIN_HEADER: &str = "x-admin-token";

/// Shared application state accessible from all handlers.
pub struct AppState<S: Storage> {
    pub checkout: CheckoutOrchestrator<S, Arc<dyn PaymentGateway>>,
    pub admin_token: String,
}

/// Who is calling, as far as this service can tell.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub is_admin: bool,
}

impl Caller {
    pub fn from_headers<S: Storage>(
        headers: &HeaderMap,
        state: &AppState<S>,
    ) -> Result<Self, ApiError> {
        let user_id = match header(headers, USER_HEADER) {
            Some(raw) => Some(UserId::from_uuid(uuid::Uuid::parse_str(raw).map_err(
                |e| ApiError::BadRequest(format!("Invalid {USER_HEADER}: {e}")),
            )?)),
            None => None,
        };
        let is_admin = header(headers, ADMIN_HEADER)
            .is_some_and(|token| !state.admin_token.is_empty() && token == state.admin_token);

        Ok(Self {
            user_id,
            session_id: header(headers, SESSION_HEADER).map(SessionId::new),
            is_admin,
        })
    }

    /// Admins see every order and users see their own. A guest order belongs
    /// to the session that placed it.
    pub fn can_access(&self, order: &Order) -> bool {
        if self.is_admin {
            return true;
        }
        match order.user_id {
            Some(owner) => self.user_id == Some(owner),
            None => self.session_id.as_ref() == Some(&order.session_id),
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin token required".to_string()))
        }
    }
}

/// Reads the cart session from the request headers.
pub fn session_id(headers: &HeaderMap) -> Result<SessionId, ApiError> {
    header(headers, SESSION_HEADER)
        .map(SessionId::new)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {SESSION_HEADER} header")))
}

/// Loads an order the caller may see. Orders owned by someone else answer
/// 404 so their IDs cannot be discovered.
pub async fn load_visible<S: Storage>(
    state: &AppState<S>,
    caller: &Caller,
    id: &str,
) -> Result<Order, ApiError> {
    let order_id = parse_order_id(id)?;
    let order = state.checkout.ledger().get_order(order_id).await?;
    if !caller.can_access(&order) {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }
    Ok(order)
}

pub fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(OrderId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
