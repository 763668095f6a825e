//! In-memory bus used by tests and single-process development setups.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use kozmic_core::Result;

use crate::{Bus, Subscription};

const TOPIC_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    backlogs: HashMap<String, Vec<String>>,
    topics: HashMap<String, broadcast::Sender<String>>,
}

/// Bus backed by per-channel broadcast channels and a mutexed backlog map.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, channel: &str) -> broadcast::Sender<String> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner
            .topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No receivers is fine; the backlog still records the line.
        let _ = self.topic(channel).send(payload.to_string());
        Ok(())
    }

    async fn append(&self, channel: &str, payload: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner
            .backlogs
            .entry(channel.to_string())
            .or_default()
            .push(payload.to_string());
        Ok(())
    }

    async fn range(&self, channel: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        Ok(inner.backlogs.get(channel).cloned().unwrap_or_default())
    }

    async fn delete(&self, channel: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.backlogs.remove(channel);
        inner.topics.remove(channel);
        Ok(())
    }

    async fn exists(&self, channel: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        Ok(inner.backlogs.contains_key(channel))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let rx = self.topic(channel).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|message| async move {
            match message {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "bus subscriber lagging, skipping messages");
                    None
                }
            }
        });
        Ok(Subscription::new(stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_preserves_append_order() {
        let bus = MemoryBus::new();
        bus.append("ch", "one\n").await.unwrap();
        bus.append("ch", "two\n").await.unwrap();
        assert_eq!(bus.range("ch").await.unwrap(), vec!["one\n", "two\n"]);
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let bus = MemoryBus::new();
        bus.append("ch", "line\n").await.unwrap();
        assert!(bus.exists("ch").await.unwrap());
        bus.delete("ch").await.unwrap();
        assert!(!bus.exists("ch").await.unwrap());
        assert!(bus.range("ch").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_only_messages_after_subscribing() {
        let bus = MemoryBus::new();
        bus.publish("ch", "early\n").await.unwrap();

        let mut sub = bus.subscribe("ch").await.unwrap();
        bus.publish("ch", "late\n").await.unwrap();

        assert_eq!(sub.next().await.as_deref(), Some("late\n"));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let bus = MemoryBus::new();
        bus.publish("nobody-listens", "line\n").await.unwrap();
    }
}
