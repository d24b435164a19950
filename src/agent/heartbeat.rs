//! 心跳任务
//!
//! 连接建立后按固定间隔发送心跳包，连接断开或收到取消信号时退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::transport::StreamTransport;

/// 心跳任务
pub struct HeartbeatTask {
    transport: Arc<StreamTransport>,
    interval: Duration,
    cancel: CancellationToken,
}

impl HeartbeatTask {
    pub fn new(transport: Arc<StreamTransport>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            transport,
            interval,
            cancel,
        }
    }

    /// 在后台运行
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// 发送心跳直到连接断开或被取消，返回已发送的心跳数
    pub async fn run(self) -> u64 {
        let mut id: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.transport.is_connected() {
                tracing::debug!("💓 No log server connection, heartbeat stops");
                break;
            }

            self.transport.send_heartbeat(id).await;
            tracing::trace!("💓 Heartbeat sent: id={}", id);
            id += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        tracing::debug!("💓 Heartbeat task exiting after {} packets", id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Packet;

    #[tokio::test(start_paused = true)]
    async fn test_three_heartbeats_in_three_intervals() {
        let (transport, mut rx) = StreamTransport::attached(16);
        let cancel = CancellationToken::new();

        let handle = HeartbeatTask::new(transport, Duration::from_secs(30), cancel.clone()).spawn();

        // 0s, 30s, 60s 各发一次；90s 的那次不在观察窗口内
        sleep(Duration::from_secs(89)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 3);

        let mut ids = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            match packet {
                Packet::HeartBeat { id } => ids.push(id),
                other => panic!("unexpected packet: {:?}", other),
            }
        }
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_without_connection() {
        let transport = StreamTransport::new(16, None);
        let sent = HeartbeatTask::new(transport, Duration::from_secs(30), CancellationToken::new())
            .run()
            .await;
        assert_eq!(sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_after_disconnect() {
        let (transport, mut rx) = StreamTransport::attached(16);
        let handle = HeartbeatTask::new(
            transport.clone(),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
        .spawn();

        assert_eq!(rx.recv().await.unwrap(), Packet::heart_beat(0));
        transport.disconnect().await;

        // 下一次醒来时发现连接已断开
        assert_eq!(handle.await.unwrap(), 1);
    }
}
