use crate::{
    orderbook::OrderBook,
    orders::{Order, OrderStatus, OrderType, Side},
    trade::Trade,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Snapshot of the book plus the last executed price, returned to callers that need a
/// read-only view without holding the engine lock across anything but the copy itself.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub last_trade_price: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarketStats {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub last_trade_price: Decimal,
}

/// The single-symbol matching engine: an [`OrderBook`] plus the bookkeeping a naked book
/// doesn't need on its own — an order index for O(1) cancel lookup, the last-trade-price,
/// and a monotonic trade sequence counter.
///
/// Strictly synchronous: nothing in this type ever awaits. The only async-facing surface is
/// the unbounded `mpsc` sender used to hand off price changes without the engine itself
/// needing to know who's listening or what they do with it.
pub struct MatchingEngine {
    book: OrderBook,
    index: HashMap<Uuid, (Side, Decimal)>,
    last_trade_price: Decimal,
    next_trade_seq: u64,
    price_tx: mpsc::UnboundedSender<Decimal>,
}

impl MatchingEngine {
    /// Builds a fresh engine seeded with `last_trade_price` (from price history, the most
    /// recent trade, or the configured default — see recovery). Returns the receiving half
    /// of the price-change channel for the caller to drain in a background task.
    pub fn new(last_trade_price: Decimal) -> (Self, mpsc::UnboundedReceiver<Decimal>) {
        let (price_tx, price_rx) = mpsc::unbounded_channel();
        let engine = Self {
            book: OrderBook::new(),
            index: HashMap::new(),
            last_trade_price,
            next_trade_seq: 0,
            price_tx,
        };
        (engine, price_rx)
    }

    pub fn last_trade_price(&self) -> Decimal {
        self.last_trade_price
    }

    pub fn best_bid_price(&self) -> Option<Decimal> {
        self.book.best_bid_price()
    }

    pub fn best_ask_price(&self) -> Option<Decimal> {
        self.book.best_ask_price()
    }

    pub fn market_stats(&self) -> MarketStats {
        let best_bid = self.best_bid_price();
        let best_ask = self.best_ask_price();
        MarketStats {
            best_bid,
            best_ask,
            spread: match (best_bid, best_ask) {
                (Some(bid), Some(ask)) => Some(ask - bid),
                _ => None,
            },
            last_trade_price: self.last_trade_price,
        }
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self.book.top_levels(Side::Buy, 10),
            asks: self.book.top_levels(Side::Sell, 10),
            last_trade_price: self.last_trade_price,
        }
    }

    /// Matches `order` against the book and, if it's a LIMIT order with quantity left over,
    /// rests it. Returns the (possibly mutated) taker order, the trades produced by this call,
    /// and every maker order touched by a fill (for the caller to persist — a maker's updated
    /// `remaining`/`status` is otherwise invisible outside the engine).
    ///
    /// Callers are expected to have already rejected MARKET orders against an empty opposite
    /// side before calling this (the engine never sees those — see the Order Service).
    pub fn add_order(&mut self, mut order: Order) -> (Order, Vec<Trade>, Vec<Order>) {
        let fills = self.book.match_incoming(&mut order);
        let mut trades = Vec::with_capacity(fills.len());
        let mut touched_makers = Vec::with_capacity(fills.len());

        for fill in fills {
            self.last_trade_price = fill.price;
            let seq = self.next_trade_seq;
            self.next_trade_seq += 1;

            let (buy_order_id, sell_order_id, buy_user_id, sell_user_id) = match fill.maker.side {
                Side::Buy => (
                    fill.maker.id,
                    fill.taker_order_id,
                    fill.maker.user_id,
                    fill.taker_user_id,
                ),
                Side::Sell => (
                    fill.taker_order_id,
                    fill.maker.id,
                    fill.taker_user_id,
                    fill.maker.user_id,
                ),
            };

            trades.push(Trade {
                id: Uuid::new_v4(),
                engine_trade_id: seq,
                price: fill.price,
                quantity: fill.quantity,
                buy_order_id,
                sell_order_id,
                buy_user_id,
                sell_user_id,
                timestamp: Utc::now(),
            });

            if fill.maker.remaining.is_zero() {
                self.index.remove(&fill.maker.id);
            }
            touched_makers.push(fill.maker);

            // An unbounded send only fails once the receiver has been dropped, which only
            // happens during shutdown; nothing useful to do with that here.
            let _ = self.price_tx.send(fill.price);
        }

        if order.remaining > Decimal::ZERO
            && order.order_type == OrderType::Limit
            && order.status == OrderStatus::Open
        {
            let price = order.price.expect("limit order always carries a price");
            self.index.insert(order.id, (order.side, price));
            self.book.insert_resting(order.clone());
        }

        info!(order_id = %order.id, trades = trades.len(), "order processed by engine");
        (order, trades, touched_makers)
    }

    /// Cancels a resting order by id. Returns the mutated, now-CANCELED order on success.
    pub fn cancel_order(&mut self, order_id: Uuid) -> Option<Order> {
        let (side, price) = self.index.remove(&order_id)?;
        let mut order = self.book.remove_from_level(side, price, order_id)?;
        order.cancel();
        Some(order)
    }
}
