//! Handler模块

use axum::{body::Bytes, extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use common::errors::AppError;
use common::middleware::InvocationId;
use common::response::{ApiResponse, FunctionResponse, ToolSchema};

use crate::state::AppState;

/// 执行诊断调用
///
/// 请求体既可以是扁平事件，也可以把参数放在 `arguments` 对象里。
/// 无论成功失败都返回 200，错误信息放在 `functionResponse.content`，
/// 包括缺少 Content-Type 或 JSON 无法解析的请求。
#[utoipa::path(
    post,
    path = "/invoke",
    tag = "diagnostics",
    request_body = common::models::DiagnosticArguments,
    responses(
        (status = 200, description = "诊断报告或错误信息", body = FunctionResponse)
    )
)]
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> Json<FunctionResponse> {
    let event = match serde_json::from_slice::<Value>(&body) {
        Ok(event) => event,
        Err(e) => {
            let err = AppError::Validation(format!("Invalid JSON request body: {}", e));
            tracing::warn!(kind = err.kind(), error = %err, "Invocation rejected");
            return Json(FunctionResponse::from(Err(err)));
        }
    };
    Json(state.service.invoke(&event).await)
}

/// 工具列表（网关注册用）
#[utoipa::path(
    get,
    path = "/api/tools",
    tag = "diagnostics",
    responses(
        (status = 200, description = "每个诊断动作一个工具定义", body = ApiResponse<Vec<ToolSchema>>)
    )
)]
pub async fn list_tools(
    State(state): State<AppState>,
    Extension(invocation_id): Extension<InvocationId>,
) -> Json<ApiResponse<Vec<ToolSchema>>> {
    Json(
        ApiResponse::ok_with_service(ToolSchema::all(), state.config.service_name.clone())
            .with_invocation_id(invocation_id.as_str()),
    )
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
