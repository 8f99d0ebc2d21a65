use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::error;
use uuid::Uuid;

use crate::{
    engine::{BookSnapshot, MarketStats, MatchingEngine},
    errors::AppError,
    orders::{Order, OrderType, Side},
    publisher::{Event, PriceChange, Publisher},
    store::{PriceHistoryEntry, Store},
    trade::Trade,
};

const MAX_SCALE: u32 = 8;

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResult {
    pub trades: Vec<Trade>,
    pub order: Order,
    #[serde(rename = "order_executed")]
    pub executed: bool,
}

fn validate(req: &PlaceOrderRequest) -> Result<(), AppError> {
    if req.quantity <= Decimal::ZERO {
        return Err(AppError::Validation("quantity must be > 0".to_string()));
    }
    if req.quantity.scale() > MAX_SCALE {
        return Err(AppError::Validation(
            "quantity exceeds 8 fractional digits".to_string(),
        ));
    }
    match req.order_type {
        OrderType::Limit => {
            let price = req
                .price
                .ok_or_else(|| AppError::Validation("limit order requires a price".to_string()))?;
            if price <= Decimal::ZERO {
                return Err(AppError::Validation("price must be > 0".to_string()));
            }
            if price.scale() > MAX_SCALE {
                return Err(AppError::Validation(
                    "price exceeds 8 fractional digits".to_string(),
                ));
            }
        }
        OrderType::Market => {
            if req.price.is_some() {
                return Err(AppError::Validation(
                    "market order must not include a price".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Owns the matching engine plus the store/publisher handles, and implements the single
/// transaction shape every mutating request goes through: lock the engine, mutate, drop the
/// lock, persist as one write batch, then publish best-effort.
pub struct OrderService {
    engine: Mutex<MatchingEngine>,
    store: Arc<RwLock<Store>>,
    publisher: Arc<Publisher>,
}

impl OrderService {
    pub fn new(
        engine: MatchingEngine,
        store: Arc<RwLock<Store>>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
            publisher,
        }
    }

    pub async fn place_order(
        &self,
        user_id: Uuid,
        req: PlaceOrderRequest,
    ) -> Result<PlaceOrderResult, AppError> {
        validate(&req)?;

        if req.order_type == OrderType::Market {
            let no_liquidity = {
                let engine = self.engine.lock().unwrap();
                match req.side {
                    Side::Buy => engine.best_ask_price().is_none(),
                    Side::Sell => engine.best_bid_price().is_none(),
                }
            };
            if no_liquidity {
                let mut order = Order::new(user_id, req.side, req.order_type, None, req.quantity);
                order.cancel();
                self.store.write().await.insert_order(&order)?;
                return Ok(PlaceOrderResult {
                    trades: Vec::new(),
                    order,
                    executed: false,
                });
            }
        }

        let order = Order::new(user_id, req.side, req.order_type, req.price, req.quantity);
        self.store.write().await.insert_order(&order)?;

        let (order, trades, makers) = {
            let mut engine = self.engine.lock().unwrap();
            engine.add_order(order)
        };

        if let Err(e) = self
            .store
            .write()
            .await
            .commit_match_results(&order, &makers, &trades)
        {
            // The engine has already applied this match in memory; a failure to persist it
            // leaves the store and the engine diverged. There is no snapshot to roll the
            // engine back to cheaply here, so this is treated as fatal per the startup
            // recovery contract: restart and let replay rebuild trustworthy state.
            error!(error = %e, "fatal: failed to commit match results, exiting for recovery replay");
            std::process::exit(1);
        }

        for trade in &trades {
            self.publisher.broadcast(Event::TradeExecuted(trade.clone()));
        }
        for maker in &makers {
            self.publisher
                .send_to_user(maker.user_id, Event::OrderStatus(maker.clone()));
        }
        self.publisher
            .send_to_user(order.user_id, Event::OrderStatus(order.clone()));
        let snapshot = self.engine.lock().unwrap().snapshot();
        self.publisher.broadcast(Event::OrderBookUpdate(snapshot));

        Ok(PlaceOrderResult {
            executed: true,
            trades,
            order,
        })
    }

    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, AppError> {
        let existing = self.store.read().await.get_order(order_id)?;
        match existing {
            Some(existing) if existing.user_id == user_id && existing.active => {}
            _ => return Err(AppError::NotFound("order not found".to_string())),
        }

        let canceled = {
            let mut engine = self.engine.lock().unwrap();
            engine.cancel_order(order_id)
        }
        .ok_or_else(|| AppError::NotFound("order not found".to_string()))?;

        self.store.write().await.update_order(&canceled)?;

        self.publisher
            .send_to_user(user_id, Event::OrderStatus(canceled.clone()));
        let snapshot = self.engine.lock().unwrap().snapshot();
        self.publisher.broadcast(Event::OrderBookUpdate(snapshot));

        Ok(canceled)
    }

    pub async fn get_user_orders(
        &self,
        user_id: Uuid,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Order>, AppError> {
        Ok(self
            .store
            .read()
            .await
            .list_user_orders(user_id, active_only, limit)?)
    }

    pub async fn get_user_trades(&self, user_id: Uuid, limit: usize) -> Result<Vec<Trade>, AppError> {
        Ok(self.store.read().await.get_user_trades(user_id, limit)?)
    }

    pub async fn get_recent_trades(&self, limit: usize) -> Result<Vec<Trade>, AppError> {
        Ok(self.store.read().await.get_recent_trades(limit)?)
    }

    pub fn get_market_stats(&self) -> MarketStats {
        self.engine.lock().unwrap().market_stats()
    }

    pub fn get_order_book_snapshot(&self) -> BookSnapshot {
        self.engine.lock().unwrap().snapshot()
    }
}

/// Drains the engine's price-change channel for the lifetime of the process: appends a
/// price-history row per tick and broadcasts a `price_change` event. Spawned once at startup
/// (see `main.rs`); the task exits naturally once the engine (and its sender) is dropped.
pub fn spawn_price_change_listener(
    mut price_rx: mpsc::UnboundedReceiver<Decimal>,
    store: Arc<RwLock<Store>>,
    publisher: Arc<Publisher>,
) {
    tokio::spawn(async move {
        while let Some(price) = price_rx.recv().await {
            let entry = PriceHistoryEntry {
                timestamp: Utc::now(),
                price,
            };
            if let Err(e) = store.write().await.insert_price_entry(&entry) {
                error!(error = %e, "failed to persist price history entry");
                continue;
            }
            publisher.broadcast(Event::PriceChange(PriceChange {
                price: entry.price,
                timestamp: entry.timestamp,
            }));
        }
    });
}
