//! Agent 配置

use std::str::FromStr;
use std::time::Duration;

use crate::agent::WatchOptions;
use crate::error::{Error, Result};

/// 默认日志服务器地址
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000/ws";

/// 每个轮询周期最多读取的行数
pub const DEFAULT_BATCH_LINES: usize = 30;

/// 日志推送 Agent 配置
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 日志服务器 WebSocket 地址，例如 "ws://120.26.103.63:8000/ws"
    pub server_url: String,
    /// 单批最大行数
    pub batch_lines: usize,
    /// 轮询间隔（文件尾部读取）
    pub poll_interval: Duration,
    /// 等待文件创建的重试间隔
    pub await_interval: Duration,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 单次写入（及关闭连接）的等待上限，None 表示不限制
    ///
    /// 超时的数据包不保证丢弃，可能稍后仍被发出。
    pub write_timeout: Option<Duration>,
    /// 发送队列容量
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            batch_lines: DEFAULT_BATCH_LINES,
            poll_interval: Duration::from_millis(100),
            await_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            write_timeout: None,
            queue_capacity: 256,
        }
    }
}

impl AgentConfig {
    /// 创建指定服务器地址的配置
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            ..Default::default()
        }
    }

    /// 从环境变量覆盖默认配置
    ///
    /// - `LOG_AGENT_SERVER_URL`
    /// - `LOG_AGENT_BATCH_LINES`
    /// - `LOG_AGENT_POLL_INTERVAL_MS`
    /// - `LOG_AGENT_HEARTBEAT_SECS`
    /// - `LOG_AGENT_WRITE_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LOG_AGENT_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(lines) = env_number::<usize>("LOG_AGENT_BATCH_LINES")? {
            if lines == 0 {
                return Err(Error::Config("LOG_AGENT_BATCH_LINES 必须大于 0".to_string()));
            }
            config.batch_lines = lines;
        }
        if let Some(ms) = env_number::<u64>("LOG_AGENT_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_number::<u64>("LOG_AGENT_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = env_number::<u64>("LOG_AGENT_WRITE_TIMEOUT_MS")? {
            config.write_timeout = Some(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// 文件监听参数
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            batch_lines: self.batch_lines,
            poll_interval: self.poll_interval,
            await_interval: self.await_interval,
        }
    }
}

fn env_number<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} 不是有效数字: {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();

        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.batch_lines, 30);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.await_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.write_timeout.is_none());
    }

    #[test]
    fn test_watch_options_follow_config() {
        let mut config = AgentConfig::new("ws://log.example:9000/ws");
        config.batch_lines = 5;
        config.poll_interval = Duration::from_millis(20);

        let options = config.watch_options();
        assert_eq!(config.server_url, "ws://log.example:9000/ws");
        assert_eq!(options.batch_lines, 5);
        assert_eq!(options.poll_interval, Duration::from_millis(20));
        assert_eq!(options.await_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_env_number_rejects_garbage() {
        std::env::set_var("LOG_AGENT_TEST_GARBAGE", "abc");
        let result = env_number::<u64>("LOG_AGENT_TEST_GARBAGE");
        assert!(matches!(result, Err(Error::Config(_))));

        std::env::set_var("LOG_AGENT_TEST_NUMBER", " 42 ");
        assert_eq!(env_number::<u64>("LOG_AGENT_TEST_NUMBER").unwrap(), Some(42));

        assert_eq!(env_number::<u64>("LOG_AGENT_TEST_UNSET").unwrap(), None);
    }
}
