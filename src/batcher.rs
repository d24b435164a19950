//! 日志分批读取
//!
//! 从文件当前位置按行读取，每行去除首尾空白后以 "\r\n" 结尾拼接成一批。
//! 普通读取每次最多 N 行；停止监听时使用 [`LogBatcher::drain`] 读到末尾。

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// 统一的行结束符
pub const LINE_TERMINATOR: &str = "\r\n";

/// 单行最大字节数，超出部分切成下一行
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// 一次读取得到的日志批次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// 拼接后的文本，每行以 "\r\n" 结尾
    pub text: String,
    /// 行数
    pub lines: usize,
    /// 是否在读满之前到达当前数据末尾
    pub reached_end: bool,
}

impl Batch {
    /// 空批次不发送
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        self.text.push_str(line.trim());
        self.text.push_str(LINE_TERMINATOR);
        self.lines += 1;
    }
}

/// 日志分批读取器
///
/// 持有文件的读取游标。末尾未写完的半行（没有 '\n'）会暂存，
/// 等后续写入补全后再作为完整一行输出。暂存部分达到单行上限时直接作为一行输出。
pub struct LogBatcher<R> {
    reader: R,
    max_lines: usize,
    max_line_bytes: usize,
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LogBatcher<R> {
    /// 创建读取器，`max_lines` 至少为 1
    pub fn new(reader: R, max_lines: usize) -> Self {
        Self {
            reader,
            max_lines: max_lines.max(1),
            max_line_bytes: MAX_LINE_BYTES,
            pending: Vec::new(),
        }
    }

    /// 设置单行最大字节数（至少为 1）
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// 读取最多 `max_lines` 行，或读到当前末尾
    pub async fn read_batch(&mut self) -> io::Result<Batch> {
        let mut batch = Batch::default();
        while batch.lines < self.max_lines {
            if !self.next_line(&mut batch).await? {
                batch.reached_end = true;
                break;
            }
        }
        Ok(batch)
    }

    /// 读出剩余全部内容（包括末尾未换行的半行）
    pub async fn drain(&mut self) -> io::Result<Batch> {
        let mut batch = Batch::default();
        while self.next_line(&mut batch).await? {}

        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            batch.push_line(&rest);
        }

        batch.reached_end = true;
        Ok(batch)
    }

    /// 读取一行完整日志，返回 false 表示暂时没有完整的行
    async fn next_line(&mut self, batch: &mut Batch) -> io::Result<bool> {
        loop {
            let room = self.max_line_bytes.saturating_sub(self.pending.len());
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(false);
            }

            let (take, complete) = match buf.iter().position(|&b| b == b'\n') {
                Some(i) if i <= room => (i + 1, true),
                _ => (buf.len().min(room), false),
            };
            self.pending.extend_from_slice(&buf[..take]);
            self.reader.consume(take);

            if complete || self.pending.len() >= self.max_line_bytes {
                if !complete {
                    tracing::debug!("✂️ Log line exceeds {} bytes, split", self.max_line_bytes);
                }
                let line = std::mem::take(&mut self.pending);
                batch.push_line(&line);
                return Ok(true);
            }
        }
    }
}
