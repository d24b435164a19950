//! 日志服务器协议定义
//!
//! 通信方式：WebSocket 文本帧，每帧一个 JSON 对象，按 `action` 区分类型。

use serde::{Deserialize, Serialize};

/// 推送给日志服务器的数据包
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Packet {
    /// 心跳（保持连接）
    #[serde(rename = "heart_beat")]
    HeartBeat {
        /// 递增计数器的十进制字符串
        id: String,
    },

    /// 推送一批日志
    #[serde(rename = "worker_push_log")]
    PushLog {
        /// 目标频道
        topic: String,
        /// 以 "\r\n" 结尾的若干行
        log: String,
    },
}

impl Packet {
    /// 构造心跳包
    pub fn heart_beat(id: u64) -> Self {
        Packet::HeartBeat { id: id.to_string() }
    }

    /// 构造日志包
    pub fn push_log(topic: impl Into<String>, log: impl Into<String>) -> Self {
        Packet::PushLog {
            topic: topic.into(),
            log: log.into(),
        }
    }

    /// action 字段值（用于日志）
    pub fn action(&self) -> &'static str {
        match self {
            Packet::HeartBeat { .. } => "heart_beat",
            Packet::PushLog { .. } => "worker_push_log",
        }
    }
}
