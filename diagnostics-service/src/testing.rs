//! In-memory doubles for the secret resolver and the database session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::{ColumnInfo, ConnectionParams, Environment, QueryResult, ScalarValue};

use common::utils::SqlValidator;

use crate::secrets::SecretResolver;
use crate::session::{DiagnosticSession, SessionConnector};

type Script = Arc<dyn Fn(&str) -> AppResult<QueryResult> + Send + Sync>;

pub fn rows(columns: &[(&str, &str)], rows: Vec<Vec<ScalarValue>>) -> QueryResult {
    let columns = columns
        .iter()
        .map(|(name, ty)| ColumnInfo::new(*name, *ty))
        .collect();
    QueryResult::new(columns, rows)
}

pub fn params() -> ConnectionParams {
    ConnectionParams::from_secret_json(
        r#"{"host":"db.test","dbname":"app","username":"ops","password":"pw","port":5432}"#,
    )
    .unwrap()
}

/// Resolves every environment to the same parameters, or fails.
pub struct StaticResolver {
    pub fail: bool,
}

#[async_trait]
impl SecretResolver for StaticResolver {
    async fn resolve(&self, environment: Environment) -> AppResult<ConnectionParams> {
        if self.fail {
            return Err(AppError::Configuration(format!(
                "not found: /AuroraOps/{}",
                environment
            )));
        }
        Ok(params())
    }
}

#[derive(Default)]
struct Recorded {
    connects: usize,
    closes: usize,
    executed: Vec<String>,
}

/// Shared record of what the sessions saw.
#[derive(Clone, Default)]
pub struct SessionLog(Arc<Mutex<Recorded>>);

impl SessionLog {
    pub fn connects(&self) -> usize {
        self.0.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }

    pub fn executed(&self) -> Vec<String> {
        self.0.lock().unwrap().executed.clone()
    }
}

/// Answers each statement through a script function.
pub struct ScriptedSession {
    log: SessionLog,
    script: Script,
    delay: Option<Duration>,
}

impl ScriptedSession {
    pub fn new(
        log: SessionLog,
        script: impl Fn(&str) -> AppResult<QueryResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            log,
            script: Arc::new(script),
            delay: None,
        }
    }
}

#[async_trait]
impl DiagnosticSession for ScriptedSession {
    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        self.log.0.lock().unwrap().executed.push(sql.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(sql)
    }

    async fn execute_single(&mut self, sql: &str) -> AppResult<QueryResult> {
        if SqlValidator::split_statements(sql).len() != 1 {
            self.log.0.lock().unwrap().executed.push(sql.to_string());
            return Err(AppError::DatabaseQuery(
                "cannot insert multiple commands into a prepared statement".into(),
            ));
        }
        self.execute(sql).await
    }

    async fn close(&mut self) {
        self.log.0.lock().unwrap().closes += 1;
    }
}

/// Hands out scripted sessions that share one log.
pub struct ScriptedConnector {
    pub log: SessionLog,
    script: Script,
    delay: Option<Duration>,
    refuse: bool,
}

impl ScriptedConnector {
    pub fn new(script: impl Fn(&str) -> AppResult<QueryResult> + Send + Sync + 'static) -> Self {
        Self {
            log: SessionLog::default(),
            script: Arc::new(script),
            delay: None,
            refuse: false,
        }
    }

    /// Every statement sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Connection attempts fail.
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self, params: &ConnectionParams) -> AppResult<Box<dyn DiagnosticSession>> {
        self.log.0.lock().unwrap().connects += 1;
        if self.refuse {
            return Err(AppError::DatabaseConnection(format!(
                "connection to {}:{} refused",
                params.host, params.port
            )));
        }
        Ok(Box::new(ScriptedSession {
            log: self.log.clone(),
            script: self.script.clone(),
            delay: self.delay,
        }))
    }
}
