//! PostgreSQL 诊断服务
//!
//! 以调用事件为输入，输出纯文本诊断报告，包括：
//! - 慢查询、连接、索引、I/O 与系统健康分析
//! - Autovacuum、复制、XID 回卷、膨胀与长事务分析
//! - 负载洞察：按总耗时排序的查询、等待事件与会话状态
//! - 只读 SQL 执行、执行计划分析与对象 DDL 提取

mod adhoc;
mod catalog;
mod ddl;
mod explain;
mod handlers;
mod report;
mod routes;
mod secrets;
mod service;
mod session;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::{load_dotenv, AppConfig};
use common::middleware::invocation_id_middleware;
use service::DiagnosticsService;
use session::PgConnector;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "diagnostics-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "诊断服务 API",
        version = "0.1.0",
        description = "PostgreSQL 诊断报告微服务"
    ),
    paths(
        handlers::invoke,
        handlers::list_tools,
        handlers::health_check,
    ),
    components(schemas(
        common::models::DiagnosticArguments,
        common::models::DiagnosticAction,
        common::models::Environment,
        common::models::ObjectType,
        common::response::FunctionResponse,
        common::response::FunctionResponseBody,
        common::response::ResponseBody,
        common::response::TextBody,
        common::response::ToolSchema,
        handlers::HealthResponse,
    )),
    tags(
        (name = "diagnostics", description = "诊断调用端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if present) before anything else
    load_dotenv();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(config.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // 创建依赖
    let resolver = secrets::create_resolver(&config).context("初始化 Secret 解析器失败")?;
    let connector = Arc::new(PgConnector::new(config.connect_timeout(), SERVICE_NAME));
    let service = DiagnosticsService::new(resolver, connector, &config);

    info!(
        provider = ?config.secret_provider,
        statement_timeout_secs = config.statement_timeout_secs,
        request_timeout_secs = config.request_timeout_secs,
        "诊断服务配置已加载"
    );

    // 创建路由
    let state = AppState::new(config.clone(), service);
    let app = create_router(state);

    // 启动服务
    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app).await.context("服务启动失败")?;
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(invocation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
