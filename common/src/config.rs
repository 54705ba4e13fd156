//! Service configuration.
//!
//! All settings come from environment variables, optionally seeded from a
//! `.env` file in the working directory.

use std::time::Duration;

/// Which secret provider resolves environment credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretProviderKind {
    /// Lambda Parameters and Secrets extension over HTTP.
    Extension,
    /// Connection JSON stored directly in `DIAG_SECRET_<ENV>` variables.
    Env,
}

impl SecretProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "extension" => Some(Self::Extension),
            "env" => Some(Self::Env),
            _ => None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name, used in logs and health responses.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Timeout for opening the database connection.
    pub connect_timeout_secs: u64,
    /// `statement_timeout` applied inside the diagnostic transaction.
    pub statement_timeout_secs: u64,
    /// Upper bound for a whole invocation, secret lookup excluded.
    pub request_timeout_secs: u64,
    /// Rows shown per ad-hoc statement.
    pub max_rows: usize,
    /// Statements accepted in one ad-hoc query.
    pub max_statements: usize,
    /// Rows shown across all statements of one ad-hoc query.
    pub max_total_rows: usize,
    /// Highest complexity score an ad-hoc statement may have.
    pub max_complexity: usize,
    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,
    /// Secret provider selection.
    pub secret_provider: SecretProviderKind,
    /// Base URL of the Parameters and Secrets extension.
    pub secrets_extension_url: String,
    /// Parameter path prefix; the environment name is appended.
    pub secret_parameter_prefix: String,
    /// Token the extension expects in `X-Aws-Parameters-Secrets-Token`.
    pub session_token: Option<String>,
    /// Connection JSON for `dev` when using the env provider.
    pub dev_secret: Option<String>,
    /// Connection JSON for `prod` when using the env provider.
    pub prod_secret: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "diagnostics-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            connect_timeout_secs: 10,
            statement_timeout_secs: 30,
            request_timeout_secs: 120,
            max_rows: 20,
            max_statements: 5,
            max_total_rows: 1000,
            max_complexity: 15,
            json_logs: false,
            secret_provider: SecretProviderKind::Extension,
            secrets_extension_url: "http://localhost:2773".to_string(),
            secret_parameter_prefix: "/AuroraOps".to_string(),
            session_token: None,
            dev_secret: None,
            prod_secret: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn load_with_service(service_name: &str) -> Self {
        load_dotenv();
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to defaults with a warning.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret_provider = match non_empty("SECRET_PROVIDER") {
            Some(raw) => SecretProviderKind::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown SECRET_PROVIDER, using extension");
                SecretProviderKind::Extension
            }),
            None => defaults.secret_provider,
        };

        Self {
            service_name: service_name.to_string(),
            host: non_empty("SERVER_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "SERVER_PORT", defaults.port),
            connect_timeout_secs: parse_or(&lookup, "CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            statement_timeout_secs: parse_or(&lookup, "STATEMENT_TIMEOUT_SECS", defaults.statement_timeout_secs),
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            max_rows: parse_or(&lookup, "MAX_ROWS", defaults.max_rows),
            max_statements: parse_or(&lookup, "MAX_STATEMENTS", defaults.max_statements),
            max_total_rows: parse_or(&lookup, "MAX_TOTAL_ROWS", defaults.max_total_rows),
            max_complexity: parse_or(&lookup, "MAX_COMPLEXITY", defaults.max_complexity),
            json_logs: non_empty("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_logs),
            secret_provider,
            secrets_extension_url: non_empty("SECRETS_EXTENSION_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.secrets_extension_url),
            secret_parameter_prefix: non_empty("SECRET_PARAMETER_PREFIX")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.secret_parameter_prefix),
            session_token: non_empty("AWS_SESSION_TOKEN"),
            dev_secret: non_empty("DIAG_SECRET_DEV"),
            prod_secret: non_empty("DIAG_SECRET_PROD"),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            default
        }),
        None => default,
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    let Ok(content) = std::fs::read_to_string(env_path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            // Only set if not already set by the environment
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}
