//! Concurrent watcher over a job's log file.
//!
//! The tailer polls the file for appended bytes, forwards complete lines to
//! the publisher and keeps the trailing partial line buffered. When no new
//! bytes arrive for `kill_timeout`, it kills the container and exits. Stop
//! is cooperative: the next loop iteration drains what is left and returns.
//! The tailer never writes to the log file.

use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::sleep;
use tracing::{error, info, warn};

use kozmic_bus::Publisher;
use kozmic_core::driver::{ContainerDriver, ContainerHandle};

pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(600);
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// What the tailer did before exiting.
#[derive(Debug, Default)]
pub struct TailerReport {
    pub killed_container: bool,
}

/// Cooperative stop flag for a running tailer.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Tailer {
    log_path: PathBuf,
    publisher: Publisher,
    driver: Arc<dyn ContainerDriver>,
    container: ContainerHandle,
    kill_timeout: Duration,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl Tailer {
    pub fn new(
        log_path: PathBuf,
        publisher: Publisher,
        driver: Arc<dyn ContainerDriver>,
        container: ContainerHandle,
    ) -> Self {
        Self {
            log_path,
            publisher,
            driver,
            container,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }

    /// Poll interval for the log file.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub async fn run(self) -> TailerReport {
        info!(
            log = %self.log_path.display(),
            channel = %self.publisher.channel(),
            "tailer has started",
        );

        let mut offset: u64 = 0;
        let mut partial = String::new();
        let mut idle = Duration::ZERO;
        let mut killed_container = false;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                // The writer is done; deliver whatever is left.
                self.poll_once(&mut offset, &mut partial).await;
                break;
            }
            let read = self.poll_once(&mut offset, &mut partial).await;
            if read == 0 {
                idle += self.read_timeout;
                if idle >= self.kill_timeout {
                    warn!(
                        container = %self.container.id,
                        "no log growth for {:?}, killing container",
                        self.kill_timeout,
                    );
                    if let Err(e) = self.driver.kill(&self.container).await {
                        error!(error = %e, "failed to kill a stalled container");
                    }
                    killed_container = true;
                    break;
                }
                sleep(self.read_timeout).await;
            } else {
                idle = Duration::ZERO;
            }
        }

        info!(killed_container, "tailer has finished");
        TailerReport { killed_container }
    }

    /// Read bytes appended since `offset`, publish the complete lines and
    /// keep the trailing partial in `partial`. Returns the byte count.
    async fn poll_once(&self, offset: &mut u64, partial: &mut String) -> usize {
        let bytes = match self.read_from(*offset).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, log = %self.log_path.display(), "failed to read log file");
                Vec::new()
            }
        };
        if bytes.is_empty() {
            return 0;
        }
        *offset += bytes.len() as u64;
        partial.push_str(&String::from_utf8_lossy(&bytes));

        let mut lines = Vec::new();
        while let Some(pos) = partial.find('\n') {
            lines.push(partial[..pos].to_string());
            partial.drain(..=pos);
        }
        if !lines.is_empty() {
            if let Err(e) = self.publisher.publish(&lines).await {
                warn!(error = %e, "failed to publish log lines");
            }
        }
        bytes.len()
    }

    async fn read_from(&self, offset: u64) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.log_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use kozmic_bus::{Bus, MemoryBus};
    use std::sync::Arc;

    fn fast_tailer(
        log_path: PathBuf,
        bus: Arc<MemoryBus>,
        driver: Arc<MockDriver>,
        kill_timeout: Duration,
    ) -> Tailer {
        let publisher = Publisher::new(bus, "tail-test");
        Tailer::new(
            log_path,
            publisher,
            driver,
            ContainerHandle { id: "c1".into() },
        )
        .with_kill_timeout(kill_timeout)
        .with_read_timeout(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn complete_lines_are_delivered_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("script.log");
        std::fs::write(&log, "one\ntwo\n").unwrap();

        let bus = Arc::new(MemoryBus::new());
        let driver = Arc::new(MockDriver::new());
        let tailer = fast_tailer(log.clone(), bus.clone(), driver, Duration::from_secs(60));
        let stop = tailer.stop_handle();
        let task = tokio::spawn(tailer.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
        let report = task.await.unwrap();

        assert!(!report.killed_container);
        assert_eq!(
            bus.range("tail-test").await.unwrap(),
            vec!["one\n", "two\n", "three\n"]
        );
    }

    #[tokio::test]
    async fn partial_lines_stay_buffered_until_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("script.log");
        std::fs::write(&log, "par").unwrap();

        let bus = Arc::new(MemoryBus::new());
        let driver = Arc::new(MockDriver::new());
        let tailer = fast_tailer(log.clone(), bus.clone(), driver, Duration::from_secs(60));
        let stop = tailer.stop_handle();
        let task = tokio::spawn(tailer.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bus.range("tail-test").await.unwrap().is_empty());

        let mut content = std::fs::read(&log).unwrap();
        content.extend_from_slice(b"tial\nrest\n");
        std::fs::write(&log, content).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
        task.await.unwrap();

        assert_eq!(
            bus.range("tail-test").await.unwrap(),
            vec!["partial\n", "rest\n"]
        );
    }

    #[tokio::test]
    async fn a_stalled_container_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("script.log");
        std::fs::write(&log, "").unwrap();

        let bus = Arc::new(MemoryBus::new());
        let driver = Arc::new(MockDriver::new());
        let tailer = fast_tailer(
            log,
            bus,
            driver.clone(),
            Duration::from_millis(30),
        );
        let report = tailer.run().await;

        assert!(report.killed_container);
        assert!(driver.ops().iter().any(|op| op == "kill c1"));
    }

    #[tokio::test]
    async fn zero_kill_timeout_kills_at_the_first_empty_poll() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("script.log");
        // The file does not even exist yet.

        let bus = Arc::new(MemoryBus::new());
        let driver = Arc::new(MockDriver::new());
        let tailer = fast_tailer(log, bus, driver.clone(), Duration::ZERO);

        let report = tokio::time::timeout(Duration::from_secs(1), tailer.run())
            .await
            .expect("tailer must not hang");
        assert!(report.killed_container);
    }

    #[tokio::test]
    async fn stop_drains_lines_written_just_before() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("script.log");
        std::fs::write(&log, "").unwrap();

        let bus = Arc::new(MemoryBus::new());
        let driver = Arc::new(MockDriver::new());
        let tailer = fast_tailer(log.clone(), bus.clone(), driver, Duration::from_secs(60));
        let stop = tailer.stop_handle();
        let task = tokio::spawn(tailer.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(&log, "last words\n").unwrap();
        stop.stop();
        task.await.unwrap();

        assert_eq!(bus.range("tail-test").await.unwrap(), vec!["last words\n"]);
    }
}
