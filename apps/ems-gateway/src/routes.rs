//! 路由定义
//!
//! - 健康检查：/health
//! - 通道状态：/channels, /channels/{name}
//! - 指标快照：/metrics
//! - 点位控制：/points/{point_id}/write

use super::AppState;
use super::handlers::*;
use crate::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// 创建 API 路由
///
/// 返回包含所有 API 端点的 Router，支持 / 和 /api/ 两种前缀
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/channels", get(list_channels))
        .route("/channels/:name", get(get_channel))
        .route("/metrics", get(get_metrics))
        .route("/points/:point_id/write", post(write_point))
}

/// 完整应用：两种前缀 + 请求追踪。
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(create_api_router())
        .nest("/api", create_api_router())
        .with_state(state)
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
}
