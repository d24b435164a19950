//! 文件监听器
//!
//! 单个日志文件的生命周期：等待文件创建 → 轮询读取并推送 → 停止时读完剩余内容 → 结束。
//! 采用轮询而不是文件系统通知，新内容最多延迟一个轮询间隔（默认 100ms）被发现。

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::BufReader;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::transport::StreamTransport;
use crate::batcher::{Batch, LogBatcher};
use crate::config::DEFAULT_BATCH_LINES;
use crate::error::Result;
use crate::registry::WatchRegistry;

/// 文件监听参数
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// 单批最大行数
    pub batch_lines: usize,
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 等待文件创建的重试间隔
    pub await_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            batch_lines: DEFAULT_BATCH_LINES,
            poll_interval: Duration::from_millis(100),
            await_interval: Duration::from_secs(1),
        }
    }
}

/// 监听状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// 等待文件创建
    AwaitingFile,
    /// 轮询读取
    Watching,
    /// 读完剩余内容
    Draining,
    /// 已结束
    Stopped,
}

/// 一次监听的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// 交给 transport 的批次数
    pub batches: usize,
    /// 交给 transport 的行数
    pub lines: usize,
}

impl WatchSummary {
    /// 累加另一次监听的统计
    pub fn merge(&mut self, other: WatchSummary) {
        self.batches += other.batches;
        self.lines += other.lines;
    }
}

/// 文件标识（开关表的 key）
pub fn watch_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 文件监听器
pub struct FileWatcher {
    registry: Arc<WatchRegistry>,
    transport: Arc<StreamTransport>,
    options: WatchOptions,
    cancel: CancellationToken,
}

impl FileWatcher {
    /// 创建文件监听器
    pub fn new(
        registry: Arc<WatchRegistry>,
        transport: Arc<StreamTransport>,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            transport,
            options,
            cancel,
        }
    }

    /// 打开文件的监听开关
    pub fn arm(&self, key: &str) {
        self.registry.set_enabled(key, true);
    }

    /// 打开开关后监听文件，把新内容推送到 `topic`，直到开关被关闭
    ///
    /// 读取错误只结束当前文件的监听。
    pub async fn watch(&self, path: &Path, topic: &str) -> Result<WatchSummary> {
        self.arm(&watch_key(path));
        self.follow(path, topic).await
    }

    /// 按开关的当前状态监听文件，不会重新打开开关
    ///
    /// 调用方需先 [`FileWatcher::arm`]，否则立即结束。
    pub async fn follow(&self, path: &Path, topic: &str) -> Result<WatchSummary> {
        let result = self.run(path, topic).await;
        match &result {
            Ok(summary) => tracing::info!(
                "👁️ Stopped watching {:?}: {} batches, {} lines",
                path,
                summary.batches,
                summary.lines
            ),
            Err(e) => tracing::error!("Watch log file {:?} err: {}", path, e),
        }
        self.enter(path, WatchState::Stopped);
        result
    }

    async fn run(&self, path: &Path, topic: &str) -> Result<WatchSummary> {
        let key = watch_key(path);
        let mut summary = WatchSummary::default();

        self.enter(path, WatchState::AwaitingFile);

        let Some(file) = self.await_file(path, &key).await? else {
            return Ok(summary);
        };

        self.enter(path, WatchState::Watching);
        let mut batcher = LogBatcher::new(BufReader::new(file), self.options.batch_lines);

        while self.should_continue(&key) {
            let batch = batcher.read_batch().await?;
            self.push(topic, batch, &mut summary).await;
            self.pause(self.options.poll_interval).await;
        }

        self.enter(path, WatchState::Draining);
        let rest = batcher.drain().await?;
        self.push(topic, rest, &mut summary).await;

        Ok(summary)
    }

    /// 等待文件创建，开关关闭时返回 None
    async fn await_file(&self, path: &Path, key: &str) -> Result<Option<File>> {
        loop {
            if !self.should_continue(key) {
                tracing::debug!("👁️ Watch disabled before {:?} was created", path);
                return Ok(None);
            }

            match File::open(path).await {
                Ok(file) => return Ok(Some(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("⏳ Log file {:?} not created yet", path);
                    self.pause(self.options.await_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn push(&self, topic: &str, batch: Batch, summary: &mut WatchSummary) {
        if batch.is_empty() {
            return;
        }

        tracing::debug!("📝 Push {} lines to topic {}", batch.lines, topic);
        summary.batches += 1;
        summary.lines += batch.lines;
        self.transport.send_log(topic, batch.text).await;
    }

    fn should_continue(&self, key: &str) -> bool {
        self.registry.is_enabled(key) && !self.cancel.is_cancelled()
    }

    /// 等待一段时间，取消时立即返回
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    fn enter(&self, path: &Path, state: WatchState) {
        tracing::trace!("👁️ {:?} → {:?}", path, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::Packet;
    use std::io::Write;
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Harness {
        registry: Arc<WatchRegistry>,
        transport: Arc<StreamTransport>,
        rx: mpsc::Receiver<Packet>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let (transport, rx) = StreamTransport::attached(64);
            Self {
                registry: Arc::new(WatchRegistry::new()),
                transport,
                rx,
                cancel: CancellationToken::new(),
            }
        }

        fn watcher(&self, poll_interval: Duration) -> FileWatcher {
            let options = WatchOptions {
                batch_lines: 30,
                poll_interval,
                await_interval: Duration::from_millis(10),
            };
            FileWatcher::new(
                self.registry.clone(),
                self.transport.clone(),
                options,
                self.cancel.clone(),
            )
        }

        async fn next_log(&mut self) -> (String, String) {
            let packet = timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for a log packet")
                .expect("transport queue closed");
            match packet {
                Packet::PushLog { topic, log } => (topic, log),
                other => panic!("unexpected packet: {:?}", other),
            }
        }
    }

    fn write_lines(path: &Path, range: std::ops::RangeInclusive<usize>) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for i in range {
            writeln!(file, "line {}", i).unwrap();
        }
    }

    fn expected_lines(range: std::ops::RangeInclusive<usize>) -> String {
        range.map(|i| format!("line {}\r\n", i)).collect()
    }

    #[tokio::test]
    async fn test_waits_for_file_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_millis(10));
        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "job-1").await });

        sleep(Duration::from_millis(100)).await;
        assert!(harness.rx.try_recv().is_err());
        assert!(harness.registry.is_enabled(&watch_key(&path)));

        write_lines(&path, 1..=2);
        let (topic, log) = harness.next_log().await;
        assert_eq!(topic, "job-1");
        assert_eq!(log, "line 1\r\nline 2\r\n");

        harness.registry.set_enabled(&watch_key(&path), false);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, WatchSummary { batches: 1, lines: 2 });
    }

    #[tokio::test]
    async fn test_batches_are_bounded_and_ordered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("build.log");
        write_lines(&path, 1..=100);
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_millis(10));
        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "build").await });

        let mut received = String::new();
        let mut lines = 0;
        while lines < 100 {
            let (_, log) = harness.next_log().await;
            let count = log.matches("\r\n").count();
            assert!(count <= 30, "batch of {} lines", count);
            lines += count;
            received.push_str(&log);
        }
        assert_eq!(received, expected_lines(1..=100));

        harness.registry.set_enabled(&watch_key(&path), false);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.lines, 100);
        assert_eq!(summary.batches, 4);
    }

    #[tokio::test]
    async fn test_stop_drains_remaining_lines_in_one_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.log");
        write_lines(&path, 1..=45);
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_millis(300));
        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "deploy").await });

        let (_, first) = harness.next_log().await;
        assert_eq!(first, expected_lines(1..=30));

        // 轮询休眠期间关闭开关
        harness.registry.set_enabled(&watch_key(&path), false);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, WatchSummary { batches: 2, lines: 45 });

        let (_, last) = harness.next_log().await;
        assert_eq!(last, expected_lines(31..=45));

        // 结束后不再有任何批次
        write_lines(&path, 46..=50);
        sleep(Duration::from_millis(50)).await;
        assert!(harness.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_wakes_poll_and_drains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        write_lines(&path, 1..=3);
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_secs(60));
        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "test").await });

        let (_, first) = harness.next_log().await;
        assert_eq!(first, expected_lines(1..=3));

        write_lines(&path, 4..=40);
        harness.cancel.cancel();

        let summary = timeout(Duration::from_secs(5), handle)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(summary, WatchSummary { batches: 2, lines: 40 });

        // 停止时的最后一批不受 30 行限制
        let (_, last) = harness.next_log().await;
        assert_eq!(last, expected_lines(4..=40));
    }

    #[tokio::test]
    async fn test_disable_while_awaiting_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.log");
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_millis(10));
        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "never").await });

        sleep(Duration::from_millis(50)).await;
        harness.registry.set_enabled(&watch_key(&path), false);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, WatchSummary::default());
        assert!(harness.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_follow_does_not_rearm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("armed.log");
        write_lines(&path, 1..=3);
        let mut harness = Harness::new();

        let watcher = harness.watcher(Duration::from_millis(10));
        watcher.arm(&watch_key(&path));
        // 启动前就被关闭：不读取、不推送
        harness.registry.set_enabled(&watch_key(&path), false);

        let summary = timeout(Duration::from_secs(2), watcher.follow(&path, "armed"))
            .await
            .expect("follow ignored the disabled switch")
            .unwrap();
        assert_eq!(summary, WatchSummary::default());
        assert!(!harness.registry.is_enabled(&watch_key(&path)));
        assert!(harness.rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_error_stops_watcher() {
        let dir = tempdir().unwrap();
        let mut harness = Harness::new();

        // 目录可以打开但不能按文件读取
        let watcher = harness.watcher(Duration::from_millis(10));
        let result = watcher.watch(dir.path(), "broken").await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(harness.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_without_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offline.log");
        write_lines(&path, 1..=5);

        let registry = Arc::new(WatchRegistry::new());
        let transport = StreamTransport::new(8, None);
        let options = WatchOptions {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let watcher = FileWatcher::new(registry.clone(), transport, options, CancellationToken::new());

        let watch_path = path.clone();
        let handle = tokio::spawn(async move { watcher.watch(&watch_path, "offline").await });

        sleep(Duration::from_millis(50)).await;
        registry.set_enabled(&watch_key(&path), false);

        // 未连接时批次被静默丢弃，读取进度照常推进
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, WatchSummary { batches: 1, lines: 5 });
    }
}
