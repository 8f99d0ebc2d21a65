use bincode::{
    config::{self, standard},
    error::{DecodeError, EncodeError},
};
use chrono::{DateTime, Utc};
use parity_db::{BTreeIterator, ColId, Db, Options};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::{auth::User, orders::Order, trade::Trade};

const COL_USERS: ColId = 0;
const COL_USERS_BY_EMAIL: ColId = 1;
const COL_ORDERS: ColId = 2;
const COL_ORDERS_BY_ID: ColId = 3;
const COL_ORDERS_BY_TIME: ColId = 4;
const COL_TRADES: ColId = 5;
const COL_TRADES_BY_USER: ColId = 6;
const COL_PRICE_HISTORY: ColId = 7;
const NUM_COLUMNS: u8 = 8;

/// One entry in the append-only price-history stream: the price of a single matched trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),
    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),
    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),
    #[error("Serialization/Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt index pointer")]
    Corrupt,
    #[error("key not found in store")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[inline]
fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, standard())?)
}

#[inline]
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    let (value, _): (T, usize) = bincode::serde::decode_from_slice(bytes, standard())?;
    Ok(value)
}

#[inline]
fn uuid_bytes(id: Uuid) -> [u8; 16] {
    *id.as_bytes()
}

#[inline]
fn ts_bytes(ts: DateTime<Utc>) -> [u8; 8] {
    ts.timestamp_nanos_opt().unwrap_or(0).to_be_bytes()
}

#[inline]
fn order_key(owner: Uuid, created_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut k = Vec::with_capacity(40);
    k.extend_from_slice(&uuid_bytes(owner));
    k.extend_from_slice(&ts_bytes(created_at));
    k.extend_from_slice(&uuid_bytes(id));
    k
}

#[inline]
fn order_time_key(created_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut k = Vec::with_capacity(24);
    k.extend_from_slice(&ts_bytes(created_at));
    k.extend_from_slice(&uuid_bytes(id));
    k
}

#[inline]
fn trade_key(created_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut k = Vec::with_capacity(24);
    k.extend_from_slice(&ts_bytes(created_at));
    k.extend_from_slice(&uuid_bytes(id));
    k
}

#[inline]
fn trade_user_key(user_id: Uuid, created_at: DateTime<Utc>, trade_id: Uuid) -> Vec<u8> {
    let mut k = Vec::with_capacity(40);
    k.extend_from_slice(&uuid_bytes(user_id));
    k.extend_from_slice(&ts_bytes(created_at));
    k.extend_from_slice(&uuid_bytes(trade_id));
    k
}

#[inline]
fn email_key(email: &str) -> Vec<u8> {
    email.to_lowercase().into_bytes()
}

/// Durable storage over a parity-db embedded key-value engine, one column family per entity
/// (and a handful of secondary-index columns storing pointers into the primary column) in
/// place of SQL tables. All query methods take `&self`; all mutating methods take `&mut self`
/// and commit a single write batch.
pub struct Store {
    db: Db,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), NUM_COLUMNS);
        for col in opts.columns.iter_mut() {
            col.btree_index = true;
        }
        let db = Db::open_or_create(&opts)?;
        Ok(Store { db })
    }

    // ---- users ----

    pub fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        let batch = vec![
            (COL_USERS, uuid_bytes(user.id).to_vec(), Some(encode(user)?)),
            (
                COL_USERS_BY_EMAIL,
                email_key(&user.email),
                Some(uuid_bytes(user.id).to_vec()),
            ),
        ];
        self.db.commit(batch)?;
        Ok(())
    }

    pub fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        match self.db.get(COL_USERS, &uuid_bytes(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        match self.db.get(COL_USERS_BY_EMAIL, &email_key(email))? {
            Some(id_bytes) => {
                let id = Uuid::from_slice(&id_bytes).map_err(|_| StoreError::Corrupt)?;
                self.get_user(id)
            }
            None => Ok(None),
        }
    }

    // ---- orders ----

    pub fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let key = order_key(order.user_id, order.created_at, order.id);
        let batch = vec![
            (COL_ORDERS, key.clone(), Some(encode(order)?)),
            (
                COL_ORDERS_BY_ID,
                uuid_bytes(order.id).to_vec(),
                Some(key.clone()),
            ),
            (
                COL_ORDERS_BY_TIME,
                order_time_key(order.created_at, order.id),
                Some(key),
            ),
        ];
        self.db.commit(batch)?;
        Ok(())
    }

    /// Overwrites an order row in place. The order's key components (owner, creation time,
    /// id) never change across its lifetime, so only the primary column needs rewriting.
    pub fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let key = self
            .db
            .get(COL_ORDERS_BY_ID, &uuid_bytes(order.id))?
            .ok_or(StoreError::NotFound)?;
        self.db.commit(vec![(COL_ORDERS, key, Some(encode(order)?))])?;
        Ok(())
    }

    pub fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        match self.db.get(COL_ORDERS_BY_ID, &uuid_bytes(id))? {
            Some(key) => match self.db.get(COL_ORDERS, &key)? {
                Some(bytes) => Ok(Some(decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// A user's orders, most recent first, optionally filtered to `active == true`.
    pub fn list_user_orders(
        &self,
        owner: Uuid,
        active_only: bool,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        let prefix = uuid_bytes(owner).to_vec();
        let mut it: BTreeIterator<'_> = self.db.iter(COL_ORDERS)?;
        it.seek(&prefix)?;

        let mut items = Vec::new();
        while let Some((k, v)) = it.next()? {
            if !k.starts_with(&prefix) {
                break;
            }
            let order: Order = decode(&v)?;
            if !active_only || order.active {
                items.push(order);
            }
        }
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    /// All orders with `active == true` and `remaining > 0`, in ascending creation order —
    /// the replay order recovery needs to reconstruct a consistent book.
    pub fn list_active_orders_time_asc(&self) -> StoreResult<Vec<Order>> {
        let mut it: BTreeIterator<'_> = self.db.iter(COL_ORDERS_BY_TIME)?;
        it.seek_to_first()?;

        let mut items = Vec::new();
        while let Some((_, pointer)) = it.next()? {
            let Some(bytes) = self.db.get(COL_ORDERS, &pointer)? else {
                continue;
            };
            let order: Order = decode(&bytes)?;
            if order.active && order.remaining > Decimal::ZERO {
                items.push(order);
            }
        }
        Ok(items)
    }

    // ---- trades ----

    pub fn insert_trade(&mut self, trade: &Trade) -> StoreResult<()> {
        let key = trade_key(trade.timestamp, trade.id);
        let batch = vec![
            (COL_TRADES, key.clone(), Some(encode(trade)?)),
            (
                COL_TRADES_BY_USER,
                trade_user_key(trade.buy_user_id, trade.timestamp, trade.id),
                Some(key.clone()),
            ),
            (
                COL_TRADES_BY_USER,
                trade_user_key(trade.sell_user_id, trade.timestamp, trade.id),
                Some(key),
            ),
        ];
        self.db.commit(batch)?;
        Ok(())
    }

    /// Trades where `user_id` was buyer or seller, most recent first.
    pub fn get_user_trades(&self, user_id: Uuid, limit: usize) -> StoreResult<Vec<Trade>> {
        let prefix = uuid_bytes(user_id).to_vec();
        let mut it: BTreeIterator<'_> = self.db.iter(COL_TRADES_BY_USER)?;
        it.seek(&prefix)?;

        let mut items = Vec::new();
        while let Some((k, pointer)) = it.next()? {
            if !k.starts_with(&prefix) {
                break;
            }
            let Some(bytes) = self.db.get(COL_TRADES, &pointer)? else {
                continue;
            };
            items.push(decode(&bytes)?);
        }
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    /// Most recent trades across all users.
    pub fn get_recent_trades(&self, limit: usize) -> StoreResult<Vec<Trade>> {
        let mut it: BTreeIterator<'_> = self.db.iter(COL_TRADES)?;
        it.seek_to_first()?;

        let mut items = Vec::new();
        while let Some((_, v)) = it.next()? {
            items.push(decode::<Trade>(&v)?);
        }
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    // ---- price history ----

    pub fn insert_price_entry(&mut self, entry: &PriceHistoryEntry) -> StoreResult<()> {
        let key = ts_bytes(entry.timestamp).to_vec();
        self.db
            .commit(vec![(COL_PRICE_HISTORY, key, Some(encode(entry)?))])?;
        Ok(())
    }

    pub fn list_recent_prices(&self, limit: usize) -> StoreResult<Vec<PriceHistoryEntry>> {
        let mut it: BTreeIterator<'_> = self.db.iter(COL_PRICE_HISTORY)?;
        it.seek_to_first()?;

        let mut items = Vec::new();
        while let Some((_, v)) = it.next()? {
            items.push(decode::<PriceHistoryEntry>(&v)?);
        }
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    /// The most recently appended price entry, if any — used to seed the engine's
    /// last-trade-price on startup.
    pub fn latest_price(&self) -> StoreResult<Option<PriceHistoryEntry>> {
        Ok(self.list_recent_prices(1)?.into_iter().next())
    }

    /// Commits the aftermath of a single engine call as one write batch: the taker's updated
    /// row, every touched maker's updated row, and every produced trade plus its secondary
    /// pointers. `taker` must already have a primary row (inserted OPEN before the engine call).
    pub fn commit_match_results(
        &mut self,
        taker: &Order,
        makers: &[Order],
        trades: &[Trade],
    ) -> StoreResult<()> {
        let mut batch = Vec::with_capacity(1 + makers.len() + trades.len() * 3);

        let taker_key = self
            .db
            .get(COL_ORDERS_BY_ID, &uuid_bytes(taker.id))?
            .ok_or(StoreError::NotFound)?;
        batch.push((COL_ORDERS, taker_key, Some(encode(taker)?)));

        for maker in makers {
            let key = self
                .db
                .get(COL_ORDERS_BY_ID, &uuid_bytes(maker.id))?
                .ok_or(StoreError::NotFound)?;
            batch.push((COL_ORDERS, key, Some(encode(maker)?)));
        }

        for trade in trades {
            let key = trade_key(trade.timestamp, trade.id);
            batch.push((COL_TRADES, key.clone(), Some(encode(trade)?)));
            batch.push((
                COL_TRADES_BY_USER,
                trade_user_key(trade.buy_user_id, trade.timestamp, trade.id),
                Some(key.clone()),
            ));
            batch.push((
                COL_TRADES_BY_USER,
                trade_user_key(trade.sell_user_id, trade.timestamp, trade.id),
                Some(key),
            ));
        }

        self.db.commit(batch)?;
        Ok(())
    }

    /// Commits an arbitrary set of already-persisted orders' updated rows plus a set of new
    /// trades, as one write batch. Used by startup recovery replay, where many orders can be
    /// touched across the whole replay pass rather than just one taker and its makers.
    pub fn commit_replay_results(
        &mut self,
        updated_orders: &[Order],
        trades: &[Trade],
    ) -> StoreResult<()> {
        let mut batch = Vec::with_capacity(updated_orders.len() + trades.len() * 3);

        for order in updated_orders {
            let key = self
                .db
                .get(COL_ORDERS_BY_ID, &uuid_bytes(order.id))?
                .ok_or(StoreError::NotFound)?;
            batch.push((COL_ORDERS, key, Some(encode(order)?)));
        }

        for trade in trades {
            let key = trade_key(trade.timestamp, trade.id);
            batch.push((COL_TRADES, key.clone(), Some(encode(trade)?)));
            batch.push((
                COL_TRADES_BY_USER,
                trade_user_key(trade.buy_user_id, trade.timestamp, trade.id),
                Some(key.clone()),
            ));
            batch.push((
                COL_TRADES_BY_USER,
                trade_user_key(trade.sell_user_id, trade.timestamp, trade.id),
                Some(key),
            ));
        }

        self.db.commit(batch)?;
        Ok(())
    }
}
