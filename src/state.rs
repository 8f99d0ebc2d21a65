use std::{path::Path, sync::Arc};

use tokio::sync::RwLock;

use crate::{
    config::Config, order_service::OrderService, publisher::Publisher, recovery::recover,
    store::Store,
};

/// The shared handle every request handler sees via axum's `State` extractor. Cloning an
/// `AppState` only clones `Arc`s; the engine, store, and session table are each shared exactly
/// once across every clone.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub store: Arc<RwLock<Store>>,
    pub publisher: Arc<Publisher>,
    pub config: Config,
}

impl AppState {
    /// Opens the store at `config.store_path`, runs startup recovery to rebuild the engine
    /// from durable state, and wires up the price-change background listener. Recovery failure
    /// is propagated so `main` can log it and exit non-zero rather than serve traffic against
    /// untrustworthy engine state.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::open(Path::new(&config.store_path), config).await
    }

    pub async fn open(store_path: &Path, config: Config) -> anyhow::Result<Self> {
        let mut store = Store::open(store_path)?;
        let (engine, price_rx) = recover(&mut store, config.default_last_trade_price)?;

        let store = Arc::new(RwLock::new(store));
        let publisher = Arc::new(Publisher::new());
        let orders = Arc::new(OrderService::new(engine, store.clone(), publisher.clone()));

        crate::order_service::spawn_price_change_listener(price_rx, store.clone(), publisher.clone());

        Ok(Self {
            orders,
            store,
            publisher,
            config,
        })
    }
}
