//! 采集指标快照。
//!
//! - GET /metrics

use api_contract::{ApiResponse, MetricsSnapshotDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_telemetry::metrics;

pub async fn get_metrics() -> Response {
    let snapshot = metrics().snapshot();
    let collect_latency_ms_avg = (snapshot.collect_latency_ms_count > 0).then(|| {
        snapshot.collect_latency_ms_total as f64 / snapshot.collect_latency_ms_count as f64
    });
    (
        StatusCode::OK,
        Json(ApiResponse::success(MetricsSnapshotDto {
            collect_batches: snapshot.collect_batches,
            collected_points: snapshot.collected_points,
            collect_failures: snapshot.collect_failures,
            connect_attempts: snapshot.connect_attempts,
            connect_failures: snapshot.connect_failures,
            no_data_events: snapshot.no_data_events,
            async_dispatched: snapshot.async_dispatched,
            async_returned: snapshot.async_returned,
            async_expired: snapshot.async_expired,
            write_requests: snapshot.write_requests,
            write_failures: snapshot.write_failures,
            events_forwarded: snapshot.events_forwarded,
            events_dropped: snapshot.events_dropped,
            collect_latency_ms_avg,
        })),
    )
        .into_response()
}
