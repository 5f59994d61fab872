//! 采集错误类型定义

/// 驱动层错误。
///
/// 调度器把 `collect` 返回的任何错误视为通道级故障：记录日志、断开连接，
/// 点位保留并在下一轮重连后继续采集。
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 协议错误
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 尚未连接
    #[error("not connected")]
    NotConnected,

    /// 点位关联（transaction）缺失或非法
    #[error("transaction error: {0}")]
    Transaction(String),

    /// 不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// 通道注册表错误。
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel already registered: {0}")]
    DuplicateChannel(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("point not assigned to any channel: {0}")]
    UnknownPoint(String),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}
