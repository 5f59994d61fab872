//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 健康检查返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDto {
    pub status: String,
    pub channels: usize,
    pub connected_channels: usize,
}

/// 通道状态返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusDto {
    pub name: String,
    pub driver: String,
    /// `connected` 或 `disconnected`。
    pub state: String,
    pub running: bool,
    pub points: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub transactions: u64,
}

/// 采集指标快照返回结构。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
    pub collect_batches: u64,
    pub collected_points: u64,
    pub collect_failures: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub no_data_events: u64,
    pub async_dispatched: u64,
    pub async_returned: u64,
    pub async_expired: u64,
    pub write_requests: u64,
    pub write_failures: u64,
    pub events_forwarded: u64,
    pub events_dropped: u64,
    pub collect_latency_ms_avg: Option<f64>,
}

/// 点位控制请求体。
#[derive(Debug, Deserialize)]
pub struct WritePointRequest {
    /// 标量 JSON 值（数字、布尔或字符串）。
    pub value: serde_json::Value,
}
