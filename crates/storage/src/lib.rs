//! Persistence layer for the checkout system.
//!
//! Defines the storage traits the domain services are written against and
//! two implementations: [`InMemoryStore`] for tests and single-process use,
//! and [`PostgresStore`] backed by sqlx.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{OrderPage, OrderQuery};
pub use records::{
    CartLine, CartRecord, NewOrder, NewOrderItem, OrderItemRecord, OrderRecord, OrderUpdate,
    PaymentEventKind, PaymentEventRecord, Product, ReservationRecord, ReserveOutcome,
    ShippingAddress, StockLine, TransitionOutcome,
};
pub use store::{
    CartSessionStore, CatalogStore, OrderStore, PaymentEventStore, ReservationStore, Storage,
};
