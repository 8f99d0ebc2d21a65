use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A trade represents a matched transaction between two orders on opposite sides.
///
/// - `price` is the resting order's price, or the limit side's price when the other side is a
///   market order.
/// - `quantity` is the amount filled in this single match, never the full remaining order size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub engine_trade_id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buy_user_id: Uuid,
    pub sell_user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}
