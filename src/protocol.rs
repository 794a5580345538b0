//! Wire protocol types for hub ↔ provider IPC.
//!
//! Every message on the provider socket is a single JSON object on one
//! line, with a mandatory `type` tag:
//!
//! ```text
//! { "type": <string>, "id"?: <string>, "data"?: <object>, "error"?: <string> }
//! ```
//!
//! | type            | direction    | semantics                                      |
//! |-----------------|--------------|------------------------------------------------|
//! | `register`      | child → hub  | bind connection to a provider, declare tools   |
//! | `tool_call`     | hub → child  | invoke a tool; answered by `tool_response`     |
//! | `tool_response` | child → hub  | terminal result (`data`) or failure (`error`)  |
//! | `log`           | child → hub  | structured log record forwarded to host logger |
//! | `reinitialize`  | hub → child  | replace provider config without a restart      |
//!
//! Data-object field names are camelCase on the wire (`toolName`,
//! `inputSchema`) so script-runtime providers can use them natively.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as declared by its provider in a `register` frame.
///
/// Schemas are opaque structured blobs; the hub stores and serves them but
/// never validates beyond well-formedness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Unique tool name (across the whole registry, case-sensitive).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub input_schema: Value,
    /// Optional JSON schema for the tool's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Payload of a `register` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Provider name; must match the name the hub assigned via the child
    /// environment.
    pub name: String,
    /// Provider version string (informational).
    #[serde(default)]
    pub version: String,
    /// Provider description (informational).
    #[serde(default)]
    pub description: String,
    /// Complete tool set; installed atomically, replacing any prior set.
    pub tools: Vec<ToolSpec>,
    /// Child process id, for cross-checking against the supervisor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Payload of a `tool_call` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    /// Name of the tool to execute.
    pub tool_name: String,
    /// Structured arguments, matching the tool's input schema.
    #[serde(default)]
    pub params: Value,
}

/// Payload of a `log` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Log level: `error`, `warn`, `info`, `debug` (anything else maps to
    /// `info`).
    pub level: String,
    /// Log message text.
    pub message: String,
    /// Optional structured fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// One message on the provider socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Child announces its identity and tool list (child → hub).
    Register {
        /// Provider identity and declared tools.
        data: RegisterPayload,
    },

    /// Tool invocation request (hub → child).
    ToolCall {
        /// Call id correlating the eventual `tool_response`.
        id: String,
        /// Tool name and arguments.
        data: ToolCallPayload,
    },

    /// Terminal response for a call id (child → hub).
    ///
    /// Exactly one of `data` / `error` is set.
    ToolResponse {
        /// Call id this responds to.
        id: String,
        /// Success result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Structured log record forwarded to the host logger (child → hub).
    Log {
        /// Level, message, and optional fields.
        data: LogPayload,
    },

    /// Replace the provider's configuration in place (hub → child).
    ///
    /// The child runs its `initialize` hook with the new config and its
    /// previous state; no process restart happens.
    Reinitialize {
        /// The new provider configuration blob.
        data: Value,
    },
}

impl WireMessage {
    /// Wire name of this message's type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResponse { .. } => "tool_response",
            Self::Log { .. } => "log",
            Self::Reinitialize { .. } => "reinitialize",
        }
    }

    /// Successful `tool_response` for `id`.
    pub fn response_ok(id: impl Into<String>, data: Value) -> Self {
        Self::ToolResponse {
            id: id.into(),
            data: Some(data),
            error: None,
        }
    }

    /// Failed `tool_response` for `id`.
    pub fn response_err(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolResponse {
            id: id.into(),
            data: None,
            error: Some(reason.into()),
        }
    }
}
