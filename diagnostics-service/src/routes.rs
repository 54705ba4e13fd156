//! 路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// Lambda 运行时接口模拟器使用的调用路径
pub const LAMBDA_INVOKE_PATH: &str = "/2015-03-31/functions/function/invocations";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoke", post(handlers::invoke))
        .route(LAMBDA_INVOKE_PATH, post(handlers::invoke))
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/health", get(handlers::health_check))
}
