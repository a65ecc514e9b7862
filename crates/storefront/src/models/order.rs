//! Order domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use wallcraft_core::{
    OrderId, OrderItemId, OrderNumber, PaymentMethod, PaymentStatus, Price, ProductId, UserId,
};

/// A purchase attempt and, once completed, its receipt.
///
/// Invariant: `paid_at` is `Some` iff `payment_status` is `Completed`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub total: Price,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Provider correlation id (Razorpay order id, then payment id once captured).
    pub payment_id: Option<String>,
    /// Method-specific data, opaque to the ledger.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// One purchased product with its price at checkout time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub price: Price,
}

/// Data required to insert a pending order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub total: Price,
    pub payment_method: PaymentMethod,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub price: Price,
}
