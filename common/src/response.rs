//! Response wrapper types.
//!
//! `FunctionResponse` is the envelope the agent gateway expects from an
//! invocation; `ApiResponse` wraps the auxiliary HTTP endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::models::{DiagnosticAction, ObjectType};

/// Invocation response envelope.
///
/// Success carries `responseBody.TEXT.body`; failure carries `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionResponse {
    #[serde(rename = "functionResponse")]
    pub function_response: FunctionResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionResponseBody {
    /// Report text (present on success).
    #[serde(rename = "responseBody", skip_serializing_if = "Option::is_none")]
    pub response_body: Option<ResponseBody>,

    /// `Error: ...` message (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResponseBody {
    #[serde(rename = "TEXT")]
    pub text: TextBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TextBody {
    pub body: String,
}

impl FunctionResponse {
    /// Wraps a rendered report.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            function_response: FunctionResponseBody {
                response_body: Some(ResponseBody {
                    text: TextBody { body: body.into() },
                }),
                content: None,
            },
        }
    }

    /// Wraps a failure as `Error: <message>`.
    pub fn error(err: &AppError) -> Self {
        Self {
            function_response: FunctionResponseBody {
                response_body: None,
                content: Some(format!("Error: {}", err)),
            },
        }
    }

    /// Report body, if this is a success envelope.
    pub fn body(&self) -> Option<&str> {
        self.function_response
            .response_body
            .as_ref()
            .map(|b| b.text.body.as_str())
    }

    /// Error content, if this is a failure envelope.
    pub fn error_content(&self) -> Option<&str> {
        self.function_response.content.as_deref()
    }
}

impl From<Result<String, AppError>> for FunctionResponse {
    fn from(result: Result<String, AppError>) -> Self {
        match result {
            Ok(body) => FunctionResponse::text(body),
            Err(err) => FunctionResponse::error(&err),
        }
    }
}

/// Tool definition as registered with the agent gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSchema {
    pub fn for_action(action: DiagnosticAction) -> Self {
        let mut properties = json!({
            "environment": {
                "type": "string",
                "description": "Target database environment: dev or prod."
            },
            "action_type": {
                "type": "string",
                "description": format!("The type of action to perform. Use '{}' for this tool.", action)
            }
        });
        let mut required = vec!["environment", "action_type"];
        if action.requires_query() {
            properties["query"] = json!({
                "type": "string",
                "description": "SQL text to analyze."
            });
            required.push("query");
        }
        if action.requires_object() {
            let kinds: Vec<&str> = ObjectType::ALL.iter().map(|t| t.as_str()).collect();
            properties["object_type"] = json!({
                "type": "string",
                "enum": kinds,
                "description": "Kind of database object."
            });
            properties["object_name"] = json!({
                "type": "string",
                "description": "Object name, case-insensitive; % and _ act as wildcards."
            });
            properties["object_schema"] = json!({
                "type": "string",
                "description": "Schema containing the object."
            });
            required.extend(["object_type", "object_name", "object_schema"]);
        }

        Self {
            name: action.as_str().to_string(),
            description: format!(
                "{} Provide the environment (dev/prod). Use action_type default value as {}.",
                action.description(),
                action
            ),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// One tool per registered action.
    pub fn all() -> Vec<Self> {
        DiagnosticAction::ALL
            .into_iter()
            .map(ToolSchema::for_action)
            .collect()
    }
}

/// Standard API response wrapper for the auxiliary endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Response metadata.
    pub meta: ResponseMeta,
}

/// Response metadata.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseMeta {
    /// Invocation ID for tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,

    /// Response timestamp.
    pub timestamp: DateTime<Utc>,

    /// Service name that handled the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            invocation_id: None,
            timestamp: Utc::now(),
            service: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response with data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: ResponseMeta::default(),
        }
    }

    /// Creates a successful response tagged with the service name.
    pub fn ok_with_service(data: T, service: impl Into<String>) -> Self {
        let mut response = Self::ok(data);
        response.meta.service = Some(service.into());
        response
    }

    /// Sets the invocation ID on the response.
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.meta.invocation_id = Some(invocation_id.into());
        self
    }
}
