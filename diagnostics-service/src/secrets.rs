//! 连接凭据解析模块
//!
//! 环境名 → 参数 `/AuroraOps/<env>`（保存 Secret ID）→ Secret JSON → 连接参数。
//! 生产环境通过 Lambda Parameters and Secrets 扩展的本地 HTTP 接口读取，
//! 本地调试可直接从环境变量读取连接 JSON。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::{AppConfig, SecretProviderKind};
use common::errors::{AppError, AppResult};
use common::models::{ConnectionParams, Environment};
use serde_json::Value;

/// Header carrying the session token expected by the extension.
const TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

/// Errors from secret resolution.
#[derive(thiserror::Error, Debug)]
pub enum SecretsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl From<SecretsError> for AppError {
    fn from(err: SecretsError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Resolves an environment name to connection parameters.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, environment: Environment) -> AppResult<ConnectionParams>;
}

/// Reads the parameter and the secret through the Parameters and Secrets extension.
pub struct ExtensionSecretResolver {
    base_url: String,
    parameter_prefix: String,
    session_token: Option<String>,
    client: reqwest::Client,
}

impl ExtensionSecretResolver {
    /// Creates a resolver against `base_url` (for example `http://localhost:2773`).
    pub fn new(
        base_url: impl Into<String>,
        parameter_prefix: impl Into<String>,
        session_token: Option<String>,
    ) -> Result<Self, SecretsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SecretsError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            parameter_prefix: parameter_prefix.into(),
            session_token,
            client,
        })
    }

    /// Parameter holding the secret id for `environment`.
    pub fn parameter_name(&self, environment: Environment) -> String {
        format!("{}/{}", self.parameter_prefix, environment)
    }

    async fn get_json(&self, path: &str, query: (&str, &str)) -> Result<Value, SecretsError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(&[query]);
        if let Some(token) = &self.session_token {
            request = request.header(TOKEN_HEADER, token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SecretsError::Unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretsError::NotFound(query.1.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("NotFound") {
                return Err(SecretsError::NotFound(query.1.to_string()));
            }
            return Err(SecretsError::Unavailable(format!("{path} returned {status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| SecretsError::Malformed(format!("parse error: {e}")))
    }
}

#[async_trait]
impl SecretResolver for ExtensionSecretResolver {
    async fn resolve(&self, environment: Environment) -> AppResult<ConnectionParams> {
        let name = self.parameter_name(environment);
        let parameter = self
            .get_json("/systemsmanager/parameters/get", ("name", &name))
            .await?;
        let secret_id = parameter["Parameter"]["Value"]
            .as_str()
            .ok_or_else(|| SecretsError::Malformed(format!("missing Parameter.Value for {name}")))?;
        tracing::debug!(parameter = %name, "Secret id resolved");

        let secret = self
            .get_json("/secretsmanager/get", ("secretId", secret_id))
            .await?;
        let secret_string = secret["SecretString"]
            .as_str()
            .ok_or_else(|| SecretsError::Malformed("missing SecretString".to_string()))?;

        ConnectionParams::from_secret_json(secret_string)
    }
}

/// Reads connection JSON from `DIAG_SECRET_DEV` / `DIAG_SECRET_PROD`.
pub struct EnvSecretResolver {
    dev: Option<String>,
    prod: Option<String>,
}

impl EnvSecretResolver {
    pub fn new(dev: Option<String>, prod: Option<String>) -> Self {
        Self { dev, prod }
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, environment: Environment) -> AppResult<ConnectionParams> {
        let raw = match environment {
            Environment::Dev => self.dev.as_deref(),
            Environment::Prod => self.prod.as_deref(),
        };
        let raw = raw.ok_or_else(|| {
            SecretsError::NotFound(format!(
                "DIAG_SECRET_{}",
                environment.as_str().to_uppercase()
            ))
        })?;
        ConnectionParams::from_secret_json(raw)
    }
}

/// Creates the resolver selected by `SECRET_PROVIDER`.
pub fn create_resolver(config: &AppConfig) -> AppResult<Arc<dyn SecretResolver>> {
    match config.secret_provider {
        SecretProviderKind::Extension => Ok(Arc::new(ExtensionSecretResolver::new(
            config.secrets_extension_url.clone(),
            config.secret_parameter_prefix.clone(),
            config.session_token.clone(),
        )?)),
        SecretProviderKind::Env => Ok(Arc::new(EnvSecretResolver::new(
            config.dev_secret.clone(),
            config.prod_secret.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::HeaderMap, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    const SECRET: &str =
        r#"{"host":"db.internal","dbname":"app","username":"ops","password":"pw","port":5432}"#;

    async fn spawn_extension() -> String {
        async fn parameter(
            headers: HeaderMap,
            Query(q): Query<HashMap<String, String>>,
        ) -> Result<Json<Value>, axum::http::StatusCode> {
            if headers.get(TOKEN_HEADER).is_none() {
                return Err(axum::http::StatusCode::FORBIDDEN);
            }
            match q.get("name").map(String::as_str) {
                Some("/AuroraOps/dev") => Ok(Json(json!({"Parameter": {"Value": "dev-secret"}}))),
                _ => Err(axum::http::StatusCode::NOT_FOUND),
            }
        }
        async fn secret(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            assert_eq!(q.get("secretId").map(String::as_str), Some("dev-secret"));
            Json(json!({"SecretString": SECRET}))
        }

        let app = Router::new()
            .route("/systemsmanager/parameters/get", get(parameter))
            .route("/secretsmanager/get", get(secret));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_extension_resolves_parameter_then_secret() {
        let base = spawn_extension().await;
        let resolver =
            ExtensionSecretResolver::new(base, "/AuroraOps", Some("token".into())).unwrap();
        let params = resolver.resolve(Environment::Dev).await.unwrap();
        assert_eq!(params.host, "db.internal");
        assert_eq!(params.dbname, "app");
    }

    #[tokio::test]
    async fn test_extension_missing_parameter_is_configuration_error() {
        let base = spawn_extension().await;
        let resolver =
            ExtensionSecretResolver::new(base, "/AuroraOps", Some("token".into())).unwrap();
        let err = resolver.resolve(Environment::Prod).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("/AuroraOps/prod"));
    }

    #[tokio::test]
    async fn test_env_resolver() {
        let resolver = EnvSecretResolver::new(Some(SECRET.to_string()), None);
        assert_eq!(resolver.resolve(Environment::Dev).await.unwrap().username, "ops");
        let err = resolver.resolve(Environment::Prod).await.unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: not found: DIAG_SECRET_PROD");
    }

    #[test]
    fn test_create_resolver_for_each_kind() {
        let mut config = AppConfig::default();
        assert!(create_resolver(&config).is_ok());
        config.secret_provider = SecretProviderKind::Env;
        assert!(create_resolver(&config).is_ok());
    }
}
