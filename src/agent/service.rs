//! Agent 服务
//!
//! 持有开关表、共享连接和所有后台任务，对外提供连接、监听控制和退出。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::heartbeat::HeartbeatTask;
use super::transport::StreamTransport;
use super::watcher::{watch_key, FileWatcher, WatchSummary};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::registry::WatchRegistry;

type WatchHandle = JoinHandle<Result<WatchSummary>>;

/// 日志推送 Agent
pub struct LogAgent {
    config: AgentConfig,
    registry: Arc<WatchRegistry>,
    transport: Arc<StreamTransport>,
    /// 全局退出信号，FileWatcher 和心跳使用它的子 token
    shutdown: CancellationToken,
    /// 当前连接的心跳任务
    heartbeat: Mutex<Option<(CancellationToken, JoinHandle<u64>)>>,
    /// 文件标识 → 监听任务
    watches: Mutex<HashMap<String, WatchHandle>>,
}

impl LogAgent {
    /// 创建 Agent（不会立即连接）
    pub fn new(config: AgentConfig) -> Self {
        let transport = StreamTransport::from_config(&config);

        Self {
            config,
            registry: Arc::new(WatchRegistry::new()),
            transport,
            shutdown: CancellationToken::new(),
            heartbeat: Mutex::new(None),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// 开关表（供外部编排方直接使用）
    pub fn registry(&self) -> Arc<WatchRegistry> {
        self.registry.clone()
    }

    /// 共享连接
    pub fn transport(&self) -> Arc<StreamTransport> {
        self.transport.clone()
    }

    /// 连接日志服务器并启动心跳
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect(&self.config.server_url).await?;

        let mut heartbeat = self.heartbeat.lock();
        let running = heartbeat
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false);
        if !running {
            let cancel = self.shutdown.child_token();
            let handle = HeartbeatTask::new(
                self.transport.clone(),
                self.config.heartbeat_interval,
                cancel.clone(),
            )
            .spawn();
            *heartbeat = Some((cancel, handle));
        }

        Ok(())
    }

    /// 断开连接并停止心跳
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;

        let heartbeat = self.heartbeat.lock().take();
        if let Some((cancel, handle)) = heartbeat {
            cancel.cancel();
            match handle.await {
                Ok(sent) => tracing::debug!("💓 Heartbeat stopped after {} packets", sent),
                Err(e) => tracing::warn!("Heartbeat task failed: {}", e),
            }
        }
    }

    /// 设置文件监听开关
    pub fn set_watch(&self, file_id: &str, enabled: bool) {
        self.registry.set_enabled(file_id, enabled);
    }

    /// 查询文件监听开关
    pub fn is_watching(&self, file_id: &str) -> bool {
        self.registry.is_enabled(file_id)
    }

    /// 开始监听文件，新内容推送到 `topic`
    ///
    /// 同一文件已有运行中且开关开启的监听任务时不会重复启动，返回 false。
    /// 旧任务已被请求停止但尚未退出时，新任务在旧任务结束后接手，避免两个任务同时读同一文件。
    pub fn start_watch(&self, path: impl Into<PathBuf>, topic: &str) -> bool {
        let path = path.into();
        let key = watch_key(&path);

        let mut watches = self.watches.lock();
        let previous = match watches.remove(&key) {
            Some(handle) if handle.is_finished() => None,
            Some(handle) if self.registry.is_enabled(&key) => {
                tracing::debug!("👁️ Already watching {:?}", path);
                watches.insert(key, handle);
                return false;
            }
            // 旧任务正在停止（可能已在读取剩余内容）
            other => other,
        };

        let watcher = FileWatcher::new(
            self.registry.clone(),
            self.transport.clone(),
            self.config.watch_options(),
            self.shutdown.child_token(),
        );
        // 先打开开关再启动任务，之后的 stop_watch 不会被任务覆盖
        watcher.arm(&key);

        let topic = topic.to_string();
        tracing::info!("👁️ Watching {:?} → topic {}", path, topic);
        let handle = tokio::spawn(async move {
            let mut total = WatchSummary::default();
            if let Some(previous) = previous {
                match join_watch(previous).await {
                    Ok(summary) => total.merge(summary),
                    Err(e) => tracing::warn!("Previous watch of {:?} ended with error: {}", path, e),
                }
            }
            total.merge(watcher.follow(&path, &topic).await?);
            Ok(total)
        });
        watches.insert(key, handle);
        true
    }

    /// 请求停止监听文件（任务会推送剩余内容后退出）
    pub fn stop_watch(&self, path: &Path) {
        self.registry.set_enabled(&watch_key(path), false);
    }

    /// 等待某个文件的监听任务结束
    pub async fn wait_watch(&self, path: &Path) -> Option<Result<WatchSummary>> {
        let handle = self.watches.lock().remove(&watch_key(path))?;
        Some(join_watch(handle).await)
    }

    /// 运行中的监听任务数
    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// 退出：关闭所有开关，等待各文件推送完剩余内容，然后断开连接
    pub async fn shutdown(&self) -> WatchSummary {
        let disabled = self.registry.disable_all();
        self.shutdown.cancel();
        tracing::info!("🛑 Shutting down, {} active watches", disabled);

        let watches: Vec<(String, WatchHandle)> = self.watches.lock().drain().collect();
        let mut total = WatchSummary::default();
        for (key, handle) in watches {
            match join_watch(handle).await {
                Ok(summary) => total.merge(summary),
                Err(e) => tracing::warn!("Watch {} ended with error: {}", key, e),
            }
        }

        self.disconnect().await;
        tracing::info!(
            "🧹 Agent stopped: {} batches, {} lines pushed",
            total.batches,
            total.lines
        );
        total
    }
}

async fn join_watch(handle: WatchHandle) -> Result<WatchSummary> {
    handle
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("watch task failed: {}", e)))?
}
