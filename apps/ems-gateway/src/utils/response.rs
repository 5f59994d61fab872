//! HTTP 错误响应与 DTO 转换。

use api_contract::{ApiResponse, ChannelStatusDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_acquisition::{ChannelStatus, RegistryError};

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 资源未找到错误响应
pub fn not_found_error(code: &str, message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(code, message.into())),
    )
        .into_response()
}

/// 注册表错误响应：归属缺失为 404，驱动失败为 502。
pub fn registry_error(err: RegistryError) -> Response {
    let message = err.to_string();
    match err {
        RegistryError::UnknownPoint(_) => not_found_error("POINT.NOT_FOUND", message),
        RegistryError::UnknownChannel(_) => not_found_error("CHANNEL.NOT_FOUND", message),
        RegistryError::Driver(_) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::<()>::error("CHANNEL.DRIVER_ERROR", message)),
        )
            .into_response(),
        RegistryError::DuplicateChannel(_) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::<()>::error("CHANNEL.DUPLICATE", message)),
        )
            .into_response(),
    }
}

/// ChannelStatus 转 ChannelStatusDto
pub fn channel_status_to_dto(status: ChannelStatus) -> ChannelStatusDto {
    ChannelStatusDto {
        name: status.name,
        driver: status.driver.to_string(),
        state: status.state.as_str().to_string(),
        running: status.running,
        points: status.points,
        queued: status.queued,
        in_flight: status.in_flight,
        transactions: status.transactions,
    }
}
