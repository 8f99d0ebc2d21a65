use std::env;

use rust_decimal::Decimal;

/// Process configuration, loaded once at startup from `.env` plus the real environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the embedded store opens (replaces `DATABASE_URL`; this store is a local
    /// parity-db directory, not a network database).
    pub store_path: String,
    pub jwt_secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    /// The single traded symbol this process serves (e.g. `BTC-USD`).
    pub symbol: String,
    /// Seeds the engine's last-trade-price on a fresh store with no price history or trades.
    pub default_last_trade_price: Decimal,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            store_path: env::var("STORE_PATH").unwrap_or_else(|_| "order_store".to_string()),
            jwt_secret_key: env::var("JWT_SECRET_KEY")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET_KEY must be set"))?,
            algorithm: env::var("ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            access_token_expire_minutes: env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "BTC-USD".to_string()),
            default_last_trade_price: env::var("DEFAULT_LAST_TRADE_PRICE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Decimal::ZERO),
        })
    }
}
