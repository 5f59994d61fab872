//! 通道状态 handlers
//!
//! - GET /channels - 列出全部通道（按名称排序）
//! - GET /channels/{name} - 单个通道状态

use api_contract::{ApiResponse, ChannelStatusDto};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::utils::response::{channel_status_to_dto, not_found_error};

pub async fn list_channels(State(state): State<AppState>) -> Response {
    let data: Vec<ChannelStatusDto> = state
        .registry
        .status()
        .into_iter()
        .map(channel_status_to_dto)
        .collect();
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub async fn get_channel(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.registry.lookup_channel(&name) {
        Some(scheduler) => (
            StatusCode::OK,
            Json(ApiResponse::success(channel_status_to_dto(scheduler.status()))),
        )
            .into_response(),
        None => not_found_error("CHANNEL.NOT_FOUND", format!("unknown channel: {name}")),
    }
}
