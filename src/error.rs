//! 错误类型定义

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// IO 错误（打开 / 读取日志文件）
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket 错误（握手失败、写入失败）
    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 日志服务器地址无效
    #[error("无效的日志服务器地址: {0}")]
    InvalidUrl(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
