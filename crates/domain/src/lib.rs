//! Business rules of the checkout system.
//!
//! This crate provides the three services the checkout saga coordinates:
//! - [`CartStore`]: session-scoped carts with a sliding expiry
//! - [`InventoryGuard`]: all-or-nothing stock reservations
//! - [`OrderLedger`]: durable orders and their state machines

pub mod cart;
pub mod inventory;
pub mod order;

pub use cart::{Cart, CartError, CartItem, CartStore};
pub use inventory::{Availability, InventoryError, InventoryGuard, ReservationToken};
pub use order::{NewPendingOrder, Order, OrderError, OrderItem, OrderLedger, OrderLine};
