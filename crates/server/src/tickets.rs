//! One-shot tickets for the streaming channel.
//!
//! A ticket maps a random 32-hex token to `(userId, collectionId)` for ten
//! seconds. Consuming a ticket removes it. With Redis configured tickets
//! are shared across processes; otherwise they live in a process-local
//! map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::AsyncCommands;

use crate::crypto;

pub const TICKET_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    pub user_id: i64,
    pub collection_id: i64,
}

pub enum TicketStore {
    Local(Mutex<HashMap<String, (Ticket, Instant)>>),
    Redis(redis::aio::MultiplexedConnection),
}

impl TicketStore {
    pub fn local() -> Self {
        TicketStore::Local(Mutex::new(HashMap::new()))
    }

    pub fn redis(conn: redis::aio::MultiplexedConnection) -> Self {
        TicketStore::Redis(conn)
    }

    pub async fn create(&self, user_id: i64, collection_id: i64) -> anyhow::Result<String> {
        let ticket_id = crypto::generate_ticket_id();
        let ticket = Ticket {
            user_id,
            collection_id,
        };

        match self {
            TicketStore::Local(tickets) => {
                let mut tickets = tickets.lock();
                tickets.retain(|_, (_, created)| created.elapsed() < TICKET_TTL);
                tickets.insert(ticket_id.clone(), (ticket, Instant::now()));
            }
            TicketStore::Redis(conn) => {
                let mut conn = conn.clone();
                let value = rmp_serde::to_vec(&(user_id, collection_id))?;
                let _: () = conn
                    .set_ex(redis_key(&ticket_id), value, TICKET_TTL.as_secs())
                    .await?;
            }
        }
        Ok(ticket_id)
    }

    /// Validate and consume in one step; a ticket is good exactly once.
    pub async fn consume(&self, ticket_id: &str) -> Option<Ticket> {
        match self {
            TicketStore::Local(tickets) => {
                let (ticket, created) = tickets.lock().remove(ticket_id)?;
                if created.elapsed() > TICKET_TTL {
                    return None;
                }
                Some(ticket)
            }
            TicketStore::Redis(conn) => {
                let mut conn = conn.clone();
                let key = redis_key(ticket_id);
                let value: Option<Vec<u8>> = conn.get(&key).await.ok()?;
                let value = value?;
                let _: Result<(), _> = conn.del(&key).await;

                let (user_id, collection_id): (i64, i64) = rmp_serde::from_slice(&value).ok()?;
                Some(Ticket {
                    user_id,
                    collection_id,
                })
            }
        }
    }
}

fn redis_key(ticket_id: &str) -> String {
    format!("ws:ticket:{ticket_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tickets_are_one_shot() {
        let store = TicketStore::local();
        let id = store.create(7, 42).await.unwrap();

        let ticket = store.consume(&id).await.unwrap();
        assert_eq!(ticket.user_id, 7);
        assert_eq!(ticket.collection_id, 42);

        assert!(store.consume(&id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_tickets_are_rejected() {
        let store = TicketStore::local();
        assert!(store.consume("deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn expired_tickets_are_rejected() {
        let store = TicketStore::local();
        let id = store.create(1, 1).await.unwrap();

        if let TicketStore::Local(tickets) = &store {
            let mut tickets = tickets.lock();
            let entry = tickets.get_mut(&id).unwrap();
            entry.1 = Instant::now() - TICKET_TTL - Duration::from_secs(1);
        }

        assert!(store.consume(&id).await.is_none());
    }
}
