//! Checkout saga constants.

/// The saga type identifier for checkout.
pub const SAGA_TYPE: &str = "Checkout";

/// Step name: Read the session cart.
pub const STEP_READ_CART: &str = "read_cart";

/// Step name: Re-read authoritative prices from the catalog.
pub const STEP_PRICE_ITEMS: &str = "price_items";

/// Step name: Reserve stock for every cart line.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Write the PENDING order.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: Open the payment with the gateway and link it to the order.
pub const STEP_INITIATE_PAYMENT: &str = "initiate_payment";

/// Step name: Capture the payment and mark the order paid.
pub const STEP_CAPTURE_PAYMENT: &str = "capture_payment";

/// Step name: Empty the cart.
pub const STEP_CLEAR_CART: &str = "clear_cart";
