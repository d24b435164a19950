//! Agent 模块 - 日志文件跟踪 + 共享连接推送 + 心跳
//!
//! Agent 负责：
//! - 按文件监听开关跟踪日志文件尾部
//! - 分批推送新增日志到日志服务器
//! - 定时发送心跳保持连接

mod heartbeat;
mod service;
mod transport;
mod watcher;

pub use heartbeat::HeartbeatTask;
pub use service::LogAgent;
pub use transport::{handshake_origin, StreamTransport};
pub use watcher::{watch_key, FileWatcher, WatchOptions, WatchState, WatchSummary};
