use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Status DAG: OPEN -> {PARTIALLY_FILLED, FILLED, CANCELED}, PARTIALLY_FILLED -> {FILLED, CANCELED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderStatus {
    /// `active` is derived from status alone: true iff OPEN or PARTIALLY_FILLED.
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Construct a fresh OPEN order with `remaining == quantity`.
    pub fn new(
        user_id: Uuid,
        side: Side,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            side,
            order_type,
            price,
            quantity,
            remaining: quantity,
            status: OrderStatus::Open,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a fill of `qty`, transitioning status and `active` together.
    pub fn apply_fill(&mut self, qty: Decimal) {
        self.remaining -= qty;
        self.status = if self.remaining.is_zero() {
            OrderStatus::Filled
        } else if self.remaining < self.quantity {
            OrderStatus::PartiallyFilled
        } else {
            self.status
        };
        self.active = self.status.is_active();
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Canceled;
        self.active = false;
        self.remaining = Decimal::ZERO;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_order_remaining_equals_quantity() {
        let o = Order::new(Uuid::new_v4(), Side::Buy, OrderType::Limit, Some(dec!(1.0)), dec!(10));
        assert_eq!(o.remaining, o.quantity);
        assert_eq!(o.status, OrderStatus::Open);
        assert!(o.active);
    }

    #[test]
    fn partial_fill_transitions_to_partially_filled() {
        let mut o = Order::new(Uuid::new_v4(), Side::Buy, OrderType::Limit, Some(dec!(1.0)), dec!(10));
        o.apply_fill(dec!(4));
        assert_eq!(o.remaining, dec!(6));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert!(o.active);
    }

    #[test]
    fn full_fill_transitions_to_filled_and_inactive() {
        let mut o = Order::new(Uuid::new_v4(), Side::Buy, OrderType::Limit, Some(dec!(1.0)), dec!(10));
        o.apply_fill(dec!(10));
        assert_eq!(o.remaining, Decimal::ZERO);
        assert_eq!(o.status, OrderStatus::Filled);
        assert!(!o.active);
    }

    #[test]
    fn cancel_clears_active_and_zeroes_remaining() {
        let mut o = Order::new(Uuid::new_v4(), Side::Buy, OrderType::Limit, Some(dec!(1.0)), dec!(10));
        o.cancel();
        assert_eq!(o.status, OrderStatus::Canceled);
        assert!(!o.active);
        assert_eq!(o.remaining, Decimal::ZERO);
    }
}
