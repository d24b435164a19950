//! log-stream-agent - 构建日志推送 Agent
//!
//! 跟踪运行中任务不断增长的日志文件，把新增的行分批通过一条持久 WebSocket
//! 连接推送到远端日志服务器，同时定时发送心跳。
//!
//! # 核心功能
//!
//! - **监听开关**: 按文件标识开启 / 关闭跟踪，未登记即关闭
//! - **分批读取**: 每轮最多 30 行，停止时一次读完剩余内容，不丢行
//! - **共享连接**: 所有发送经由单一写任务串行写出，连接缺失时静默跳过
//! - **心跳**: 每 30 秒一次，连接断开后自动退出
//!
//! # 协议
//!
//! ```text
//! {"action":"heart_beat","id":"<counter>"}
//! {"action":"worker_push_log","topic":"<topic>","log":"<lines joined by \r\n>"}
//! ```

pub mod agent;
pub mod batcher;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;

// Re-exports
pub use agent::{FileWatcher, HeartbeatTask, LogAgent, StreamTransport, WatchOptions, WatchSummary};
pub use batcher::{Batch, LogBatcher, MAX_LINE_BYTES};
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use protocol::Packet;
pub use registry::WatchRegistry;
