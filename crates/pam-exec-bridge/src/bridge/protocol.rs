//! RPC method surface between the bridge and the helper.
//!
//! Item numbers, return codes and message styles travel as the raw
//! integers the framework defines; the dispatcher converts them back to
//! typed values and answers bad ones per call. Method names the bridge
//! does not know fold into [`BridgeRequest::Unknown`] so the dispatcher
//! can answer "unknown method" without dropping the connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One helper-originated method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BridgeRequest {
    SetItem {
        item: i32,
        value: String,
    },
    GetItem {
        item: i32,
    },
    SetEnv {
        name: String,
        value: String,
    },
    UnsetEnv {
        name: String,
    },
    GetEnv {
        name: String,
    },
    GetEnvList,
    SetData {
        key: String,
        value: serde_json::Value,
    },
    UnsetData {
        key: String,
    },
    GetData {
        key: String,
    },
    Prompt {
        style: i32,
        msg: String,
    },
    JsonConversation {
        data: Vec<u8>,
    },

    /// Catch-all for method names this bridge does not implement.
    #[serde(other)]
    Unknown,
}

impl BridgeRequest {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::SetItem { .. } => "set_item",
            Self::GetItem { .. } => "get_item",
            Self::SetEnv { .. } => "set_env",
            Self::UnsetEnv { .. } => "unset_env",
            Self::GetEnv { .. } => "get_env",
            Self::GetEnvList => "get_env_list",
            Self::SetData { .. } => "set_data",
            Self::UnsetData { .. } => "unset_data",
            Self::GetData { .. } => "get_data",
            Self::Prompt { .. } => "prompt",
            Self::JsonConversation { .. } => "json_conversation",
            Self::Unknown => "unknown",
        }
    }
}

/// The answer to one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BridgeResponse {
    /// Bare framework status code.
    Status { code: i32 },

    /// Status code plus a string payload (items, env reads, prompts).
    StatusValue { code: i32, value: String },

    /// Status code plus the environment map.
    EnvList {
        code: i32,
        env: BTreeMap<String, String>,
    },

    /// Status code plus opaque data. The absence of a value is spelled out
    /// because the frame always carries the field.
    Data { code: i32, value: DataValue },

    /// Raw extension payload (JsonConversation only).
    Bytes { data: Vec<u8> },

    /// Structured per-call failure; the connection stays open.
    Error { kind: ErrorKind, message: String },
}

/// An opaque value or the explicit "no value" sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataValue {
    Absent,
    Present { value: serde_json::Value },
}

impl DataValue {
    pub fn into_option(self) -> Option<serde_json::Value> {
        match self {
            Self::Absent => None,
            Self::Present { value } => Some(value),
        }
    }
}

/// Wire-level error classes, mirroring the failure modes of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownMethod,
    InvalidArgs,
    NotSupported,
    ConversationFailed,
}
