//! Pub/sub bus keyed by job channel, with a replayable backlog.
//!
//! Each job's log is broadcast on a channel named by the job's `task_uuid`
//! and simultaneously appended to an ordered backlog stored under the same
//! key. Late subscribers read the backlog with `range` and then follow live
//! messages. Deleting the key is the end-of-stream signal; there is no
//! sentinel message.

pub mod ansi;
pub mod memory;
pub mod publisher;
pub mod redis;

pub use ansi::ansi_to_html;
pub use memory::MemoryBus;
pub use publisher::Publisher;
pub use redis::RedisBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use kozmic_core::Result;

/// Broadcast channel + backlog list under one key.
///
/// For a single writer, the observable order of `append` and `publish`
/// matches the writer's call order. Subscribers only receive messages
/// published after they subscribed; `range` covers the rest.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Fan a payload out to current subscribers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Append a payload to the channel's backlog.
    async fn append(&self, channel: &str, payload: &str) -> Result<()>;

    /// Read the whole backlog.
    async fn range(&self, channel: &str) -> Result<Vec<String>>;

    /// Atomically remove the backlog key. Signals end-of-stream.
    async fn delete(&self, channel: &str) -> Result<()>;

    /// Whether the backlog key is present.
    async fn exists(&self, channel: &str) -> Result<bool>;

    /// Start receiving messages published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// A consumer endpoint over one channel.
pub struct Subscription {
    inner: BoxStream<'static, String>,
}

impl Subscription {
    pub fn new(inner: BoxStream<'static, String>) -> Self {
        Self { inner }
    }

    /// Next live message, or `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<String> {
        self.inner.next().await
    }
}
