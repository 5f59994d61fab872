//! 协议错误类型定义

use ems_acquisition::DriverError;

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// MQTT 错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 未知的驱动类型
    #[error("unknown driver kind: {0}")]
    UnknownKind(String),
}

impl From<ProtocolError> for DriverError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Connection(msg) => DriverError::Connection(msg),
            ProtocolError::Io(err) => DriverError::Io(err),
            ProtocolError::Timeout(msg) => DriverError::Timeout(msg),
            ProtocolError::ConfigParse(msg) => DriverError::Transaction(msg),
            ProtocolError::UnknownKind(kind) => DriverError::Unsupported(kind),
            other @ (ProtocolError::Modbus(_)
            | ProtocolError::Mqtt(_)
            | ProtocolError::DataParse(_)) => DriverError::Protocol(other.to_string()),
        }
    }
}
