//! 日志服务器连接
//!
//! 整个进程共享一条 WebSocket 连接。所有发送方（各文件的 FileWatcher、心跳任务）
//! 只往队列里投递数据包，由唯一的写任务持有 socket 并按顺序写出。

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::protocol::Packet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 一条已建立的连接
struct Connection {
    /// 发送队列
    tx: mpsc::Sender<Packet>,
    /// 写任务
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// 释放发送端，等待写任务把队列写完并发送 Close
    async fn close(self) {
        drop(self.tx);
        if let Some(writer) = self.writer {
            let _ = writer.await;
        }
    }
}

/// 共享的日志服务器连接
pub struct StreamTransport {
    /// 当前连接，None 表示未连接
    connection: Mutex<Option<Connection>>,
    /// 发送队列容量
    queue_capacity: usize,
    /// 单次写入超时
    write_timeout: Option<Duration>,
}

impl StreamTransport {
    /// 创建未连接的 transport
    pub fn new(queue_capacity: usize, write_timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(None),
            queue_capacity: queue_capacity.max(1),
            write_timeout,
        })
    }

    /// 按 Agent 配置创建
    pub fn from_config(config: &AgentConfig) -> Arc<Self> {
        Self::new(config.queue_capacity, config.write_timeout)
    }

    /// 连接日志服务器
    ///
    /// 例如 url 为 "ws://120.26.103.63:8000/ws" 时，握手 Origin 为 "http://120.26.103.63:8000/"。
    /// 已有连接时，新连接建立成功后关闭旧连接。
    pub async fn connect(&self, url: &str) -> Result<()> {
        let origin = handshake_origin(url)?;
        let origin_value = HeaderValue::from_str(&origin)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        request.headers_mut().insert(ORIGIN, origin_value);

        tracing::info!("🔌 Dial to log server: url({}), origin({})", url, origin);
        let (ws, _) = connect_async(request).await?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let writer = tokio::spawn(run_writer(ws, rx, self.write_timeout));

        let previous = self.connection.lock().replace(Connection {
            tx,
            writer: Some(writer),
        });
        if let Some(previous) = previous {
            tracing::warn!("🔌 Replacing existing log server connection");
            previous.close().await;
        }

        tracing::info!("✅ Connected to log server: {}", url);
        Ok(())
    }

    /// 断开连接，未连接时什么也不做
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        match connection {
            Some(connection) => {
                connection.close().await;
                tracing::info!("🔌 Disconnected from log server");
            }
            None => tracing::debug!("🔌 Disconnect requested without a connection"),
        }
    }

    /// 连接存在且写任务仍在运行
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| !c.tx.is_closed())
            .unwrap_or(false)
    }

    /// 发送心跳包
    pub async fn send_heartbeat(&self, id: u64) {
        self.send(Packet::heart_beat(id)).await;
    }

    /// 推送一批日志
    pub async fn send_log(&self, topic: &str, log: String) {
        self.send(Packet::push_log(topic, log)).await;
    }

    /// 投递数据包（未连接时静默跳过，失败只记录日志）
    pub async fn send(&self, packet: Packet) {
        // 先 clone sender 再释放锁
        let tx = self.connection.lock().as_ref().map(|c| c.tx.clone());
        let Some(tx) = tx else {
            tracing::trace!("📭 No log server connection, skip {} packet", packet.action());
            return;
        };

        let action = packet.action();
        if tx.send(packet).await.is_err() {
            tracing::warn!("📭 Log server connection closed, dropping {} packet", action);
        }
    }

    /// 测试用：挂接一个队列代替真实连接
    #[cfg(test)]
    pub(crate) fn attached(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let transport = Self::new(capacity, None);
        let (tx, rx) = mpsc::channel(capacity);
        *transport.connection.lock() = Some(Connection { tx, writer: None });
        (transport, rx)
    }
}

/// 取 url 按 '/' 切分后的第三段作为握手主机
pub fn handshake_origin(url: &str) -> Result<String> {
    match url.split('/').nth(2) {
        Some(host) if !host.is_empty() => Ok(format!("http://{}/", host)),
        _ => Err(Error::InvalidUrl(url.to_string())),
    }
}

/// 写任务：独占 socket，按队列顺序写出数据包，同时消费服务端发来的帧
async fn run_writer(mut ws: WsStream, mut rx: mpsc::Receiver<Packet>, write_timeout: Option<Duration>) {
    loop {
        tokio::select! {
            packet = rx.recv() => {
                let Some(packet) = packet else {
                    // 所有发送端已释放
                    close_socket(&mut ws, write_timeout).await;
                    break;
                };

                match write_packet(&mut ws, &packet, write_timeout).await {
                    Ok(()) => {}
                    Err(Error::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                        tracing::warn!("📭 Log server connection closed while sending {}", packet.action());
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Send {} to log server err: {}", packet.action(), e);
                    }
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("🔌 Log server closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Log server connection err: {}", e);
                    break;
                }
                None => {
                    tracing::info!("🔌 Log server connection ended");
                    break;
                }
            }
        }
    }
}

/// 发送 Close 帧，等待时间与单次写入相同
async fn close_socket(ws: &mut WsStream, write_timeout: Option<Duration>) {
    let close = ws.close(None);
    let result = match write_timeout {
        Some(limit) => match timeout(limit, close).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("🔌 Close log server connection timed out after {:?}", limit);
                return;
            }
        },
        None => close.await,
    };
    if let Err(e) = result {
        tracing::debug!("Close log server connection err: {}", e);
    }
}

/// 写出一个数据包
///
/// 超时只放弃等待：帧可能已进入 socket 的写缓冲，之后仍会随下一次写入发出。
async fn write_packet(ws: &mut WsStream, packet: &Packet, write_timeout: Option<Duration>) -> Result<()> {
    let json = serde_json::to_string(packet)?;
    let send = ws.send(Message::text(json));

    match write_timeout {
        Some(limit) => timeout(limit, send).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write timed out after {:?}", limit),
            )
        })??,
        None => send.await?,
    }
    Ok(())
}
