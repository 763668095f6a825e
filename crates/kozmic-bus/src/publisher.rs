//! Sink that owns a job's pub/sub channel for the job's duration.

use std::sync::Arc;

use kozmic_core::Result;

use crate::{Bus, ansi_to_html};

/// Translates raw log lines to markup, fans them out and records them in
/// the backlog. `finish` tears the channel down; the job runner calls it on
/// every exit path.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn Bus>,
    channel: String,
}

impl Publisher {
    pub fn new(bus: Arc<dyn Bus>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish lines (without trailing newlines) in order: each line is
    /// translated, newline-terminated, broadcast and appended.
    pub async fn publish<I, S>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let mut payload = ansi_to_html(line.as_ref());
            payload.push('\n');
            self.bus.publish(&self.channel, &payload).await?;
            self.bus.append(&self.channel, &payload).await?;
        }
        Ok(())
    }

    /// Delete the channel key, signalling end-of-stream to subscribers.
    pub async fn finish(&self) -> Result<()> {
        self.bus.delete(&self.channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBus;

    #[tokio::test]
    async fn backlog_equals_the_translated_lines_in_order() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(bus.clone(), "job-1");

        publisher.publish(["plain", "\x1b[32mok\x1b[0m"]).await.unwrap();

        assert_eq!(
            bus.range("job-1").await.unwrap(),
            vec![
                "plain\n".to_string(),
                "<span class=\"ansi32\">ok</span>\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn live_subscribers_see_lines_as_they_are_published() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(bus.clone(), "job-2");
        let mut sub = bus.subscribe("job-2").await.unwrap();

        publisher.publish(["hello"]).await.unwrap();

        assert_eq!(sub.next().await.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn finish_deletes_the_channel_key() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(bus.clone(), "job-3");

        publisher.publish(["line"]).await.unwrap();
        assert!(bus.exists("job-3").await.unwrap());

        publisher.finish().await.unwrap();
        assert!(!bus.exists("job-3").await.unwrap());
    }
}
