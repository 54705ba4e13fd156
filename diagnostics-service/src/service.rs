//! 诊断调度服务
//!
//! 一次调用的完整流程：
//! - 解析并校验请求参数（任何 I/O 之前）
//! - 通过 Secret 解析连接参数并建立数据库会话
//! - 按动作执行目录查询、只读 SQL、执行计划分析或 DDL 提取
//! - 渲染文本报告，并且无论成功与否都关闭会话

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{DdlTarget, DiagnosticAction, DiagnosticRequest};
use common::response::FunctionResponse;
use serde_json::Value;
use tracing::Instrument;

use crate::adhoc::{self, PlannedStatement, QueryLimits};
use crate::catalog::{self, DiagnosticQuery};
use crate::ddl;
use crate::explain::{self, PreparedExplain};
use crate::secrets::SecretResolver;
use crate::session::{DiagnosticSession, SessionConnector};

/// What an invocation will run, decided before any connection is opened.
enum Plan {
    Catalog(&'static [DiagnosticQuery]),
    Execute(Vec<PlannedStatement>),
    Explain(PreparedExplain),
    ExtractDdl(DdlTarget),
}

impl Plan {
    fn for_request(request: &DiagnosticRequest, limits: &QueryLimits) -> AppResult<Self> {
        let action = request.action;
        match action {
            DiagnosticAction::SlowQuery
            | DiagnosticAction::ConnectionManagementIssues
            | DiagnosticAction::IndexAnalysis
            | DiagnosticAction::AutovacuumAnalysis
            | DiagnosticAction::IoAnalysis
            | DiagnosticAction::ReplicationAnalysis
            | DiagnosticAction::SystemHealth
            | DiagnosticAction::VacuumProgress
            | DiagnosticAction::XidAnalysis
            | DiagnosticAction::BloatAnalysis
            | DiagnosticAction::LongRunningTransactions
            | DiagnosticAction::PerformanceInsightsAnalysis => catalog::queries(action)
                .map(Plan::Catalog)
                .ok_or_else(|| {
                    AppError::Internal(format!("no query set registered for '{}'", action))
                }),
            DiagnosticAction::ExecuteQuery => {
                adhoc::prepare(required_query(request)?, limits).map(Plan::Execute)
            }
            DiagnosticAction::ExplainQuery => {
                explain::prepare(required_query(request)?).map(Plan::Explain)
            }
            DiagnosticAction::ExtractDdl => request
                .object
                .clone()
                .map(Plan::ExtractDdl)
                .ok_or_else(|| {
                    AppError::Validation(
                        "Both object_name and object_schema are required".to_string(),
                    )
                }),
        }
    }
}

fn required_query(request: &DiagnosticRequest) -> AppResult<&str> {
    request.query.as_deref().ok_or_else(|| {
        AppError::Validation(format!(
            "Missing required parameter 'query' for action_type '{}'.",
            request.action
        ))
    })
}

/// Dispatches invocation events to the diagnostic runners.
pub struct DiagnosticsService {
    resolver: Arc<dyn SecretResolver>,
    connector: Arc<dyn SessionConnector>,
    limits: QueryLimits,
    request_timeout: Duration,
}

impl DiagnosticsService {
    pub fn new(
        resolver: Arc<dyn SecretResolver>,
        connector: Arc<dyn SessionConnector>,
        config: &AppConfig,
    ) -> Self {
        Self {
            resolver,
            connector,
            limits: QueryLimits {
                max_rows: config.max_rows,
                max_statements: config.max_statements,
                max_total_rows: config.max_total_rows,
                max_complexity: config.max_complexity,
                statement_timeout: config.statement_timeout(),
            },
            request_timeout: config.request_timeout(),
        }
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Handles one invocation event. Failures become an `Error: ...` envelope.
    pub async fn invoke(&self, event: &Value) -> FunctionResponse {
        let result = self.handle(event).await;
        if let Err(e) = &result {
            if e.is_validation() {
                tracing::warn!(kind = e.kind(), error = %e, "Invocation rejected");
            } else {
                tracing::error!(kind = e.kind(), error = %e, "Invocation failed");
            }
        }
        FunctionResponse::from(result)
    }

    async fn handle(&self, event: &Value) -> AppResult<String> {
        let request = DiagnosticRequest::from_event(event)?;
        let span = tracing::info_span!(
            "diagnostic",
            environment = %request.environment,
            action = %request.action,
        );
        self.run(&request).instrument(span).await
    }

    async fn run(&self, request: &DiagnosticRequest) -> AppResult<String> {
        let plan = Plan::for_request(request, &self.limits)?;

        let params = self.resolver.resolve(request.environment).await?;
        let mut session = self.connector.connect(&params).await?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.execute(session.as_mut(), request.action, &plan),
        )
        .await;
        session.close().await;

        let report = outcome
            .map_err(|_| AppError::Timeout(self.request_timeout.as_millis() as u64))??;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = report.len(),
            "Report generated"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        session: &mut dyn DiagnosticSession,
        action: DiagnosticAction,
        plan: &Plan,
    ) -> AppResult<String> {
        match plan {
            Plan::Catalog(set) => {
                let report =
                    catalog::collect(session, action, *set, self.limits.statement_timeout).await?;
                let failures = report.failures();
                if !failures.is_empty() {
                    let errors: Vec<String> = failures
                        .iter()
                        .map(|(name, error)| format!("{}: {}", name, error))
                        .collect();
                    tracing::warn!(
                        failed = failures.len(),
                        total = report.entries().len(),
                        errors = ?errors,
                        "Some diagnostic queries failed"
                    );
                }
                Ok(report.render())
            }
            Plan::Execute(statements) => {
                let report = adhoc::execute(session, statements, &self.limits).await?;
                Ok(report.render())
            }
            Plan::Explain(prepared) => {
                let analysis =
                    explain::run(session, prepared, self.limits.statement_timeout).await?;
                Ok(analysis.render())
            }
            Plan::ExtractDdl(target) => {
                let report = ddl::run(session, target, self.limits.statement_timeout).await?;
                Ok(report.render())
            }
        }
    }
}
