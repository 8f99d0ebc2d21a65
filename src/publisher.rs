use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{collections::HashMap, sync::RwLock};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::{engine::BookSnapshot, orders::Order, trade::Trade};

#[derive(Debug, Clone, Serialize)]
pub struct PriceChange {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A structured event pushed to one or more subscribed sessions. Serializes as an
/// internally-tagged enum: `{"type": "trade_executed", "data": { ... }}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "order_book_update")]
    OrderBookUpdate(BookSnapshot),
    #[serde(rename = "trade_executed")]
    TradeExecuted(Trade),
    #[serde(rename = "order_status")]
    OrderStatus(Order),
    #[serde(rename = "price_change")]
    PriceChange(PriceChange),
    #[serde(rename = "connected")]
    Connected { user_id: Uuid },
    #[serde(rename = "error")]
    Error { message: String },
}

pub type SessionId = Uuid;

struct Session {
    user_id: Option<Uuid>,
    tx: mpsc::UnboundedSender<Event>,
}

/// Fans structured [`Event`]s out to subscribed WebSocket sessions: broadcast-to-all, or
/// send-to-user for events that only concern one counterparty (e.g. an order-status update).
pub struct Publisher {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new session, optionally tied to an authenticated user, and returns its id
    /// plus the receiving half the caller's WebSocket task should forward to the socket.
    pub fn register(&self, user_id: Option<Uuid>) -> (SessionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .unwrap()
            .insert(id, Session { user_id, tx });
        (id, rx)
    }

    pub fn unregister(&self, id: SessionId) {
        self.sessions.write().unwrap().remove(&id);
    }

    pub fn broadcast(&self, event: Event) {
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().unwrap();
            for (id, session) in sessions.iter() {
                if session.tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        self.evict(dead);
    }

    pub fn send_to_user(&self, user_id: Uuid, event: Event) {
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().unwrap();
            for (id, session) in sessions.iter() {
                if session.user_id == Some(user_id) && session.tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        self.evict(dead);
    }

    fn evict(&self, dead: Vec<SessionId>) {
        if dead.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().unwrap();
        for id in dead {
            debug!(session_id = %id, "evicting session after failed send");
            sessions.remove(&id);
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_registered_session() {
        let publisher = Publisher::new();
        let (_id1, mut rx1) = publisher.register(None);
        let (_id2, mut rx2) = publisher.register(None);

        publisher.broadcast(Event::Error {
            message: "hello".to_string(),
        });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn send_to_user_only_reaches_matching_sessions() {
        let publisher = Publisher::new();
        let user = Uuid::new_v4();
        let (_id1, mut rx1) = publisher.register(Some(user));
        let (_id2, mut rx2) = publisher.register(Some(Uuid::new_v4()));

        publisher.send_to_user(
            user,
            Event::Connected {
                user_id: user,
            },
        );

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_evicted_on_next_send() {
        let publisher = Publisher::new();
        let (id, rx) = publisher.register(None);
        drop(rx);

        publisher.broadcast(Event::Error {
            message: "x".to_string(),
        });

        assert!(!publisher.sessions.read().unwrap().contains_key(&id));
    }
}
