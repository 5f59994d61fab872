use api_contract::{ApiResponse, HealthDto};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_acquisition::ConnectionState;

use crate::AppState;

/// 健康检查：进程存活即返回 ok，并附带通道连接概况。
pub async fn health(State(state): State<AppState>) -> Response {
    let statuses = state.registry.status();
    let connected_channels = statuses
        .iter()
        .filter(|status| status.state == ConnectionState::Connected)
        .count();
    let health = HealthDto {
        status: "ok".to_string(),
        channels: statuses.len(),
        connected_channels,
    };
    (StatusCode::OK, Json(ApiResponse::success(health))).into_response()
}
