//! ASCII Socket 驱动
//!
//! 通过 TCP 发送文本查询并读取文本响应。
//!
//! - 通道参数：`host:port[:timeout_ms]`，通道名为 `host:port`
//! - 输入 transaction：`query[:expected_lines]`，查询串支持 `\n`、`\r` 转义
//! - 输出 transaction：`command`，其中 `$V` 替换为下发值

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{MonitorPoint, PointValueData};
use ems_acquisition::{CollectorDriver, DriverContext, DriverError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::types::Endpoint;

struct AsciiConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// ASCII Socket 采集驱动
pub struct AsciiSocketDriver {
    endpoint: Endpoint,
    connection: Option<AsciiConnection>,
}

impl AsciiSocketDriver {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connection: None,
        }
    }

    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        Ok(Self::new(Endpoint::from_args(args)?))
    }

    /// 注册到通道表时使用的名称
    pub fn channel_name(&self) -> String {
        self.endpoint.address()
    }

    fn connection(&mut self) -> Result<&mut AsciiConnection, ProtocolError> {
        self.connection
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("not connected".to_string()))
    }

    /// 发送查询并读取响应行。
    async fn query(&mut self, query: &str, expected_lines: Option<usize>) -> Result<String, ProtocolError> {
        let timeout = self.endpoint.timeout();
        let conn = self.connection()?;
        discard_pending(&mut conn.reader)?;

        conn.writer.write_all(query.as_bytes()).await?;
        conn.writer.flush().await?;
        debug!(target: "ems.protocol", query = %query.trim_end(), "sent query");

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(timeout, conn.reader.read_line(&mut line))
                .await
                .map_err(|_| ProtocolError::Timeout("response".to_string()))??;
            if read == 0 {
                return Err(ProtocolError::Connection("connection closed".to_string()));
            }
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());

            let more = match expected_lines {
                Some(expected) => lines.len() < expected,
                None => !conn.reader.buffer().is_empty(),
            };
            if !more {
                break;
            }
        }
        Ok(lines.join("\n"))
    }
}

/// 丢弃上次请求残留的未读数据。
fn discard_pending(reader: &mut BufReader<OwnedReadHalf>) -> Result<(), ProtocolError> {
    let buffered = reader.buffer().len();
    reader.consume(buffered);
    let mut scratch = [0u8; 512];
    loop {
        match reader.get_ref().try_read(&mut scratch) {
            Ok(0) => return Err(ProtocolError::Connection("connection closed".to_string())),
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

/// 展开文本中的 `\n` 与 `\r` 转义。
pub(crate) fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\r", "\r")
}

#[async_trait]
impl CollectorDriver<MonitorPoint> for AsciiSocketDriver {
    fn kind(&self) -> &'static str {
        "ascii_socket"
    }

    async fn connect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
        if self.connection.is_some() {
            return Ok(true);
        }
        let address = self.endpoint.address();
        let stream = tokio::time::timeout(self.endpoint.timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect {address}")))?
            .map_err(|err| ProtocolError::Connection(format!("{address}: {err}")))?;
        let (reader, writer) = stream.into_split();
        self.connection = Some(AsciiConnection {
            reader: BufReader::new(reader),
            writer,
        });
        info!(target: "ems.protocol", address = %address, "connected");
        Ok(true)
    }

    async fn disconnect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
        if let Some(mut conn) = self.connection.take() {
            if let Err(err) = conn.writer.shutdown().await {
                debug!(target: "ems.protocol", error = %err, "socket shutdown failed");
            }
        }
        Ok(())
    }

    async fn collect(
        &mut self,
        points: &[Arc<MonitorPoint>],
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        for point in points {
            let Some(transaction) = point.input_transactions_for(ctx.channel_name()).first().copied()
            else {
                warn!(
                    target: "ems.protocol",
                    point_id = %point.id(),
                    channel = %ctx.channel_name(),
                    "no input transaction for channel"
                );
                ctx.emit_no_data(point.id());
                continue;
            };
            let Some(query) = transaction.arg(0) else {
                warn!(target: "ems.protocol", point_id = %point.id(), "empty query transaction");
                ctx.emit_no_data(point.id());
                continue;
            };
            let expected_lines = transaction.arg(1).and_then(|raw| raw.trim().parse::<usize>().ok());

            let response = self.query(&unescape(query), expected_lines).await?;
            ctx.emit_value(point.id(), PointValueData::parse_text(&response));
        }
        Ok(())
    }

    async fn write(
        &mut self,
        point: &Arc<MonitorPoint>,
        value: &PointValueData,
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        let command = point
            .output_transactions_for(ctx.channel_name())
            .first()
            .and_then(|transaction| transaction.arg(0))
            .map(|command| unescape(command).replace("$V", &value.to_string()))
            .ok_or_else(|| {
                DriverError::Transaction(format!("no output transaction for {}", point.id()))
            })?;
        let conn = self.connection()?;
        conn.writer.write_all(command.as_bytes()).await?;
        conn.writer.flush().await?;
        debug!(target: "ems.protocol", point_id = %point.id(), "sent control command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_control_sequences() {
        assert_eq!(unescape("TEMP?\\r\\n"), "TEMP?\r\n");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn channel_name_is_host_port() {
        let args: Vec<String> = ["10.0.0.5", "4001", "300"].map(str::to_string).to_vec();
        let driver = AsciiSocketDriver::from_args(&args).expect("driver");
        assert_eq!(driver.channel_name(), "10.0.0.5:4001");
    }
}
