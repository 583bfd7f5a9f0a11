//! Minimal in-memory stand-ins for the Order/Inventory/Payment domain state
//! each saga handler reacts to. Pricing, catalog, and persistence are
//! explicitly out of scope here — this is just enough state for the saga
//! state machine to have something to mutate and for tests to assert
//! against.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Created,
    StockReserved,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub status: OrderStatus,
    pub product_id: String,
    pub quantity: i64,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryRecord {
    pub available: i64,
    pub reserved: i64,
}

/// Shared, process-local domain state. A real service would back this with
/// its own database; the saga handlers here only need a place to read and
/// mutate it idempotently.
#[derive(Default)]
pub struct DomainState {
    orders: Mutex<HashMap<String, OrderRecord>>,
    inventory: Mutex<HashMap<String, InventoryRecord>>,
}

impl DomainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_inventory(&self, product_id: impl Into<String>, available: i64) {
        self.inventory.lock().unwrap().insert(
            product_id.into(),
            InventoryRecord {
                available,
                reserved: 0,
            },
        );
    }

    pub fn create_order(&self, order_id: impl Into<String>, product_id: impl Into<String>, quantity: i64, source: Option<String>) {
        self.orders.lock().unwrap().insert(
            order_id.into(),
            OrderRecord {
                status: OrderStatus::Created,
                product_id: product_id.into(),
                quantity,
                source,
            },
        );
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.lock().unwrap().get(order_id).cloned()
    }

    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(order_id) {
            order.status = status;
        }
    }

    pub fn inventory(&self, product_id: &str) -> InventoryRecord {
        self.inventory.lock().unwrap().get(product_id).copied().unwrap_or_default()
    }

    /// Attempt to reserve `quantity` units of `product_id`. Returns `true`
    /// if enough stock was available (and moves it from available to
    /// reserved), `false` otherwise.
    pub fn try_reserve(&self, product_id: &str, quantity: i64) -> bool {
        let mut inventory = self.inventory.lock().unwrap();
        let record = inventory.entry(product_id.to_string()).or_default();
        if record.available < quantity {
            return false;
        }
        record.available -= quantity;
        record.reserved += quantity;
        true
    }

    /// Compensate a reservation: move stock back from reserved to available.
    pub fn release(&self, product_id: &str, quantity: i64) {
        let mut inventory = self.inventory.lock().unwrap();
        let record = inventory.entry(product_id.to_string()).or_default();
        record.reserved -= quantity;
        record.available += quantity;
    }

    /// Convert a reservation into a permanent consumption: stock leaves
    /// `reserved` for good (it was already removed from `available` at
    /// reservation time).
    pub fn consume_reservation(&self, product_id: &str, quantity: i64) {
        let mut inventory = self.inventory.lock().unwrap();
        let record = inventory.entry(product_id.to_string()).or_default();
        record.reserved -= quantity;
    }
}
