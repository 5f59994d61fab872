//! 点位控制 handlers
//!
//! - POST /points/{point_id}/write - 把值下发到点位所属通道

use api_contract::{ApiResponse, WritePointRequest};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::PointValueData;
use serde_json::Value;
use tracing::info;

use crate::AppState;
use crate::utils::response::{bad_request_error, registry_error};

pub async fn write_point(
    State(state): State<AppState>,
    Path(point_id): Path<String>,
    Json(req): Json<WritePointRequest>,
) -> Response {
    let Some(value) = point_value_from_json(&req.value) else {
        return bad_request_error("value must be a number, bool or string");
    };
    match state.registry.write(&point_id, &value).await {
        Ok(()) => {
            info!(target: "ems.gateway", point_id = %point_id, value = %value, "point write accepted");
            (StatusCode::OK, Json(ApiResponse::success(()))).into_response()
        }
        Err(err) => registry_error(err),
    }
}

fn point_value_from_json(value: &Value) -> Option<PointValueData> {
    match value {
        Value::Bool(flag) => Some(PointValueData::Bool(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(PointValueData::I64)
            .or_else(|| number.as_f64().map(PointValueData::F64)),
        Value::String(text) => Some(PointValueData::String(text.clone())),
        _ => None,
    }
}
