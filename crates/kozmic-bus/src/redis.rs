//! Redis-backed bus: PUBLISH/SUBSCRIBE for live messages, a list under the
//! same key for the backlog. DEL on the key is the end-of-stream signal.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use kozmic_core::{Error, Result};

use crate::{Bus, Subscription};

pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to the pub/sub endpoint, e.g. `redis://localhost:6379/0`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(redis_err)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(redis_err)?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await.map_err(redis_err)?;
        Ok(())
    }

    async fn append(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(channel, payload).await.map_err(redis_err)?;
        Ok(())
    }

    async fn range(&self, channel: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(channel, 0, -1).await.map_err(redis_err)
    }

    async fn delete(&self, channel: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(channel).await.map_err(redis_err)?;
        Ok(())
    }

    async fn exists(&self, channel: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(channel).await.map_err(redis_err)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(redis_err)?;
        pubsub.subscribe(channel).await.map_err(redis_err)?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Subscription::new(stream.boxed()))
    }
}

fn redis_err(e: redis::RedisError) -> Error {
    Error::Internal(format!("redis: {e}"))
}
