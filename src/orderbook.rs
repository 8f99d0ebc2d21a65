use crate::orders::{Order, OrderType, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};
use uuid::Uuid;

/// One match between an incoming (taker) order and a resting (maker) order.
///
/// `price` follows the price-discovery rule: the resting order's price always wins, since a
/// resting order is by construction a LIMIT order that arrived strictly before the taker.
/// `maker` is a snapshot of the maker order *after* this fill was applied, so the caller can
/// persist its updated `remaining`/`status` without needing a second lookup.
#[derive(Debug, Clone)]
pub struct Fill {
    pub maker: Order,
    pub taker_order_id: Uuid,
    pub taker_user_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// An [`OrderBook`] stores **active** buy and sell orders in two separate
/// [`BTreeMap`]s:
/// - `bids` (buy orders)
/// - `asks` (sell orders)
///
/// Each price level (key) has a FIFO queue of orders stored in a [`VecDeque`]
/// to maintain **price-time** priority. Only LIMIT orders ever rest here; MARKET
/// orders are matched in full or discarded and never occupy a price level.
pub struct OrderBook {
    /// Buy orders, keyed by price in ascending order.
    ///
    /// The best bid is the highest price, so matching walks this map in reverse.
    pub bids: BTreeMap<Decimal, VecDeque<Order>>,

    /// Sell orders, keyed by price in ascending order.
    ///
    /// The best ask is the lowest price, so matching walks this map forwards.
    pub asks: BTreeMap<Decimal, VecDeque<Order>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn best_bid_price(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask_price(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Rests a LIMIT order at its price level. Callers are responsible for only resting
    /// orders that still have `remaining > 0` after matching.
    pub fn insert_resting(&mut self, order: Order) {
        debug_assert_eq!(order.order_type, OrderType::Limit);
        let price = order.price.expect("resting orders always carry a price");
        let book_side = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        book_side.entry(price).or_default().push_back(order);
    }

    /// Removes a specific resting order from a known side/price, for O(1)-lookup cancellation
    /// once the caller (the matching engine) has resolved `id` to `(side, price)` via its index.
    pub fn remove_from_level(&mut self, side: Side, price: Decimal, id: Uuid) -> Option<Order> {
        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = book_side.get_mut(&price)?;
        let pos = level.iter().position(|o| o.id == id)?;
        let removed = level.remove(pos);
        if level.is_empty() {
            book_side.remove(&price);
        }
        removed
    }

    fn can_match(incoming: &Order, resting: &Order) -> bool {
        if incoming.order_type == OrderType::Market || resting.order_type == OrderType::Market {
            return true;
        }
        let (bid_price, ask_price) = match incoming.side {
            Side::Buy => (incoming.price, resting.price),
            Side::Sell => (resting.price, incoming.price),
        };
        match (bid_price, ask_price) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => true,
        }
    }

    fn prune_if_empty(book_side: &mut BTreeMap<Decimal, VecDeque<Order>>, price: Decimal) {
        if book_side.get(&price).is_some_and(VecDeque::is_empty) {
            book_side.remove(&price);
        }
    }

    /// Matches `incoming` against the opposite side of the book until it is fully filled, the
    /// book runs out of matchable liquidity, or the best opposite price no longer crosses.
    ///
    /// Does not rest any leftover quantity — callers call [`OrderBook::insert_resting`]
    /// afterwards for LIMIT orders that still have `remaining > 0`.
    pub fn match_incoming(&mut self, incoming: &mut Order) -> Vec<Fill> {
        info!(order_id = %incoming.id, side = ?incoming.side, "matching incoming order");
        let mut fills = Vec::new();
        let opposite_is_asks = incoming.side == Side::Buy;

        loop {
            if incoming.remaining.is_zero() {
                break;
            }
            let best_price = if opposite_is_asks {
                self.asks.keys().next().copied()
            } else {
                self.bids.keys().next_back().copied()
            };
            let Some(price) = best_price else { break };

            let matchable = {
                let level = if opposite_is_asks {
                    self.asks.get(&price).unwrap()
                } else {
                    self.bids.get(&price).unwrap()
                };
                let front = level.front().expect("price level is never left empty");
                Self::can_match(incoming, front)
            };
            if !matchable {
                break;
            }

            let mut resting = {
                let level = if opposite_is_asks {
                    self.asks.get_mut(&price).unwrap()
                } else {
                    self.bids.get_mut(&price).unwrap()
                };
                level.pop_front().expect("checked non-empty above")
            };
            let book_side = if opposite_is_asks {
                &mut self.asks
            } else {
                &mut self.bids
            };
            Self::prune_if_empty(book_side, price);

            if !resting.active {
                // Can't happen while the engine holds its single writer lock; defensive only.
                warn!(order_id = %resting.id, "skipping stale resting order popped from book");
                continue;
            }

            let trade_price = resting.price.expect("resting orders always carry a price");
            let qty = incoming.remaining.min(resting.remaining);

            incoming.apply_fill(qty);
            resting.apply_fill(qty);

            fills.push(Fill {
                maker: resting.clone(),
                taker_order_id: incoming.id,
                taker_user_id: incoming.user_id,
                price: trade_price,
                quantity: qty,
            });

            if resting.remaining > Decimal::ZERO {
                let book_side = if opposite_is_asks {
                    &mut self.asks
                } else {
                    &mut self.bids
                };
                book_side.entry(price).or_default().push_front(resting);
            }
        }

        info!(fills = fills.len(), "matching pass complete");
        fills
    }

    /// Top `depth` aggregated levels for one side, ordered best-first.
    pub fn top_levels(&self, side: Side, depth: usize) -> Vec<(Decimal, Decimal)> {
        let levels: Box<dyn Iterator<Item = (&Decimal, &VecDeque<Order>)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        levels
            .take(depth)
            .map(|(&price, orders)| (price, orders.iter().map(|o| o.remaining).sum()))
            .collect()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
