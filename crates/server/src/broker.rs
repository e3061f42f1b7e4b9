//! Best-effort pub/sub fan-out for change notifications.
//!
//! Write paths publish to `col.<collectionId>`; streaming channels
//! subscribe. Without Redis the fan-out is a set of in-process broadcast
//! channels, so notifications reach subscribers of this process only and
//! clients fall back to their normal resync. Publishing never blocks a
//! write path and delivery is not guaranteed.

use std::collections::HashMap;

use futures::StreamExt;
use parking_lot::Mutex;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc};

const LOCAL_CHANNEL_CAPACITY: usize = 100;

pub enum Broker {
    Local(LocalBroker),
    Redis(RedisBroker),
}

impl Broker {
    pub fn local() -> Self {
        Broker::Local(LocalBroker::default())
    }

    pub async fn redis(url: &str) -> anyhow::Result<Self> {
        Ok(Broker::Redis(RedisBroker::connect(url).await?))
    }

    /// Fire-and-forget publish; failures are logged and swallowed.
    pub async fn publish(&self, channel: &str, payload: Vec<u8>) {
        match self {
            Broker::Local(local) => local.publish(channel, payload),
            Broker::Redis(redis) => {
                if let Err(e) = redis.publish(channel, payload).await {
                    tracing::warn!(channel, "broker publish failed: {e}");
                }
            }
        }
    }

    pub async fn subscribe(&self, channel: &str) -> anyhow::Result<Subscription> {
        match self {
            Broker::Local(local) => Ok(Subscription::Local(local.subscribe(channel))),
            Broker::Redis(redis) => Ok(Subscription::Redis(redis.subscribe(channel).await?)),
        }
    }
}

/// In-process fan-out: one broadcast channel per subscribed topic.
#[derive(Default)]
pub struct LocalBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl LocalBroker {
    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(LOCAL_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn publish(&self, channel: &str, payload: Vec<u8>) {
        // No receivers is the common case and not an error.
        let _ = self.sender(channel).send(payload);
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(channel).subscribe()
    }
}

pub struct RedisBroker {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBroker {
    async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Each subscription holds its own pub/sub connection; messages are
    /// pumped into an mpsc channel until the subscriber goes away.
    async fn subscribe(&self, channel: &str) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(LOCAL_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("dropping undecodable pubsub message: {e}");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

pub enum Subscription {
    Local(broadcast::Receiver<Vec<u8>>),
    Redis(mpsc::Receiver<Vec<u8>>),
}

impl Subscription {
    /// Next payload, or `None` once the channel is gone. A lagged local
    /// subscriber skips ahead; lost notifications are covered by resync.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match self {
            Subscription::Local(rx) => loop {
                match rx.recv().await {
                    Ok(payload) => return Some(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged behind broker");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Subscription::Redis(rx) => rx.recv().await,
        }
    }
}

/// Broker channel name for a collection.
pub fn collection_channel(collection_id: i64) -> String {
    format!("col.{collection_id}")
}
