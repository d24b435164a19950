//! log-agent - 日志推送 Agent
//!
//! 用法：`log-agent <path>[=<topic>]...`
//!
//! 服务器地址等配置见 `AgentConfig::from_env`。Ctrl-C 时推送完剩余日志再退出。

use std::path::PathBuf;

use anyhow::Result;
use log_stream_agent::{AgentConfig, LogAgent};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 解析 `path=topic`，未指定 topic 时使用文件名（不含扩展名）
fn parse_target(arg: &str) -> (PathBuf, String) {
    match arg.split_once('=') {
        Some((path, topic)) if !topic.is_empty() => (PathBuf::from(path), topic.to_string()),
        _ => {
            let path = PathBuf::from(arg.trim_end_matches('='));
            let topic = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("default")
                .to_string();
            (path, topic)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("log_stream_agent=debug".parse()?))
        .init();

    tracing::info!("🚀 log-agent v{}", env!("CARGO_PKG_VERSION"));

    let targets: Vec<(PathBuf, String)> = std::env::args().skip(1).map(|a| parse_target(&a)).collect();
    if targets.is_empty() {
        tracing::error!("❌ Usage: log-agent <path>[=<topic>]...");
        std::process::exit(2);
    }

    let config = AgentConfig::from_env()?;
    let agent = LogAgent::new(config);
    agent.connect().await?;

    for (path, topic) in targets {
        agent.start_watch(path, &topic);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到中断信号，准备退出...");

    let total = agent.shutdown().await;
    tracing::info!(
        "👋 log-agent exiting ({} batches, {} lines)",
        total.batches,
        total.lines
    );
    Ok(())
}
