//! Connection models.
//!
//! Target environments and the connection parameters resolved for them.

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Target environment of a diagnostic request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development database.
    Dev,
    /// Production database.
    Prod,
}

impl Environment {
    /// All recognised environments, in documentation order.
    pub const ALL: [Environment; 2] = [Environment::Dev, Environment::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Environment::ALL.iter().map(|e| e.as_str()).collect();
                AppError::Validation(format!(
                    "Unknown environment '{}'. Available environments: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// PostgreSQL connection parameters, as stored in the environment secret.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Database host.
    pub host: String,
    /// Database name.
    #[serde(alias = "database")]
    pub dbname: String,
    /// Login role.
    #[serde(alias = "user")]
    pub username: String,
    /// Password (never serialized).
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Port; secrets store it either as a number or as a string.
    #[serde(default = "default_port", deserialize_with = "port_from_number_or_string")]
    pub port: u16,
}

impl ConnectionParams {
    /// Parses the JSON secret string.
    pub fn from_secret_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Configuration(format!("invalid connection secret: {}", e)))
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

fn default_port() -> u16 {
    5432
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}
