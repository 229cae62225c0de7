//! Shared types for the checkout system.
//!
//! Identifiers, fixed-point money and the status state machines used by every
//! other crate in the workspace.

pub mod money;
pub mod status;
pub mod types;

pub use money::Money;
pub use status::{OrderStatus, ParseStatusError, PaymentMethod, PaymentStatus, ReservationState};
pub use types::{IdempotencyKey, OrderId, ProductId, ReservationId, SessionId, UserId};
