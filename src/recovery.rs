use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::{engine::MatchingEngine, store::Store, trade::Trade};

/// Rebuilds the in-memory engine from durable state at startup: seeds the last-trade-price,
/// then replays every still-active order (creation order) through `add_order` so the book
/// converges to the same state it would have reached had it never been lost. Any trades this
/// replay produces are persisted in a single batch once replay is complete.
///
/// Startup replay failure is fatal by convention: callers should propagate the `Err` up to
/// `main`, log it, and exit non-zero rather than serve traffic against untrustworthy state.
#[instrument(skip(store))]
pub fn recover(
    store: &mut Store,
    default_last_trade_price: Decimal,
) -> anyhow::Result<(MatchingEngine, mpsc::UnboundedReceiver<Decimal>)> {
    let last_trade_price = store
        .latest_price()?
        .map(|entry| entry.price)
        .or(store.get_recent_trades(1)?.into_iter().next().map(|t| t.price))
        .unwrap_or(default_last_trade_price);
    info!(%last_trade_price, "seeding engine last-trade-price");

    let (mut engine, price_rx) = MatchingEngine::new(last_trade_price);

    let active_orders = store.list_active_orders_time_asc()?;
    info!(count = active_orders.len(), "replaying active orders through engine");

    let mut touched: HashMap<_, _> = HashMap::new();
    let mut replayed_trades: Vec<Trade> = Vec::new();

    for order in active_orders {
        let (final_order, trades, makers) = engine.add_order(order);
        touched.insert(final_order.id, final_order);
        for maker in makers {
            touched.insert(maker.id, maker);
        }
        replayed_trades.extend(trades);
    }

    if !touched.is_empty() || !replayed_trades.is_empty() {
        let updated: Vec<_> = touched.into_values().collect();
        info!(
            updated_orders = updated.len(),
            trades = replayed_trades.len(),
            "persisting replay results"
        );
        store.commit_replay_results(&updated, &replayed_trades)?;
    }

    Ok((engine, price_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{Order, OrderType, Side};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn empty_store_seeds_default_price_and_empty_book() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let (engine, _rx) = recover(&mut store, dec!(42)).unwrap();
        assert_eq!(engine.last_trade_price(), dec!(42));
        assert!(engine.best_bid_price().is_none());
    }

    #[test]
    fn price_history_tail_wins_over_configured_default() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store
            .insert_price_entry(&crate::store::PriceHistoryEntry {
                timestamp: chrono::Utc::now(),
                price: dec!(77),
            })
            .unwrap();
        let (engine, _rx) = recover(&mut store, dec!(1)).unwrap();
        assert_eq!(engine.last_trade_price(), dec!(77));
    }

    #[test]
    fn overlapping_persisted_orders_replay_into_a_matched_book() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();

        let buy = Order::new(buyer, Side::Buy, OrderType::Limit, Some(dec!(100)), dec!(5));
        let sell = Order::new(seller, Side::Sell, OrderType::Limit, Some(dec!(100)), dec!(5));
        store.insert_order(&buy).unwrap();
        store.insert_order(&sell).unwrap();

        let (engine, _rx) = recover(&mut store, dec!(0)).unwrap();
        assert_eq!(engine.last_trade_price(), dec!(100));
        assert!(engine.best_bid_price().is_none());
        assert!(engine.best_ask_price().is_none());

        let stored_buy = store.get_order(buy.id).unwrap().unwrap();
        let stored_sell = store.get_order(sell.id).unwrap().unwrap();
        assert_eq!(stored_buy.remaining, Decimal::ZERO);
        assert_eq!(stored_sell.remaining, Decimal::ZERO);
        assert_eq!(store.get_recent_trades(10).unwrap().len(), 1);
    }

    #[test]
    fn non_crossing_orders_replay_back_into_the_book_untouched() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let owner = Uuid::new_v4();
        let order = Order::new(owner, Side::Buy, OrderType::Limit, Some(dec!(90)), dec!(3));
        store.insert_order(&order).unwrap();

        let (engine, _rx) = recover(&mut store, dec!(0)).unwrap();
        assert_eq!(engine.best_bid_price(), Some(dec!(90)));
    }
}
