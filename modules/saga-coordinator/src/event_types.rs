//! Canonical event type strings. Bit-exact — consumers across services
//! depend on them.

pub const PRODUCT_CREATED: &str = "PRODUCT_CREATED";
pub const PRODUCT_DELETED: &str = "PRODUCT_DELETED";
pub const ORDER_CREATED: &str = "ORDER_CREATED";
pub const ORDER_CONFIRMED: &str = "ORDER_CONFIRMED";
pub const ORDER_CANCELLED: &str = "ORDER_CANCELLED";
pub const ORDER_TIMEOUT: &str = "ORDER_TIMEOUT";
pub const RESERVE: &str = "RESERVE";
pub const RELEASE: &str = "RELEASE";
pub const RESTOCK: &str = "RESTOCK";
pub const INVENTORY_RESERVED: &str = "INVENTORY_RESERVED";
pub const INVENTORY_RESERVE_FAILED: &str = "INVENTORY_RESERVE_FAILED";
pub const STOCK_RESERVED: &str = "STOCK_RESERVED";
pub const PAYMENT_INITIATED: &str = "PAYMENT_INITIATED";
pub const PAYMENT_SUCCEEDED: &str = "PAYMENT_SUCCEEDED";
pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";
pub const PAYMENT_CANCEL: &str = "PAYMENT_CANCEL";
pub const SECKILL_ORDER_WON: &str = "seckill.order.won";

/// Default topology's queues, each with an implicit `<queue>.dlq` sibling.
pub const Q_ORDER_EVENTS: &str = "q.order.events";
pub const Q_INVENTORY_EVENTS: &str = "q.inventory.events";
pub const Q_PAYMENT_EVENTS: &str = "q.payment.events";
pub const Q_PRODUCTS: &str = "q.products";
pub const Q_ORDER_SECKILL: &str = "q.order-seckill";
