//! Method dispatcher: routes one helper RPC call to the framework
//! primitives and shapes the reply.
//!
//! Dispatch failures answer only the offending call; the connection stays
//! open for subsequent ones.

use std::collections::BTreeMap;

use crate::bridge::extension::{ExtensionRecord, JSON_EXTENSION, JSON_PROTO_NAME, JSON_PROTO_VERSION};
use crate::bridge::protocol::{BridgeRequest, BridgeResponse, DataValue};
use crate::error::ProtocolError;
use crate::host::{ConvRequest, ConvResponse, HostTransaction, Item, MessageStyle, ReturnCode};

/// Prefix applied to helper-chosen data keys before they reach the
/// framework's per-handle storage, so helpers cannot clobber the bridge's
/// own entries (or other modules').
const DATA_KEY_PREFIX: &str = "exec-bridge-data-";

pub(crate) fn data_key(key: &str) -> String {
    format!("{DATA_KEY_PREFIX}{key}")
}

fn status(code: ReturnCode) -> BridgeResponse {
    BridgeResponse::Status {
        code: code.as_raw(),
    }
}

fn protocol_error(err: ProtocolError) -> BridgeResponse {
    BridgeResponse::Error {
        kind: err.kind(),
        message: err.to_string(),
    }
}

/// Answer one helper call. `extension_type` is the negotiated message type
/// of the JSON extension, captured once before the helper was spawned.
pub fn dispatch(
    host: &mut dyn HostTransaction,
    extension_type: Option<u32>,
    req: BridgeRequest,
) -> BridgeResponse {
    tracing::debug!(method = req.method_name(), "helper call");

    match req {
        BridgeRequest::SetItem { item, value } => match Item::from_raw(item) {
            Some(item) => status(host.set_item(item, &value)),
            None => status(ReturnCode::BadItem),
        },

        BridgeRequest::GetItem { item } => match Item::from_raw(item) {
            Some(item) => {
                let (code, value) = host.get_item(item);
                BridgeResponse::StatusValue {
                    code: code.as_raw(),
                    value,
                }
            }
            None => BridgeResponse::StatusValue {
                code: ReturnCode::BadItem.as_raw(),
                value: String::new(),
            },
        },

        BridgeRequest::SetEnv { name, value } => {
            status(host.putenv(&format!("{name}={value}")))
        }

        BridgeRequest::UnsetEnv { name } => {
            if name.contains('=') {
                return protocol_error(ProtocolError::InvalidArgument(format!(
                    "invalid char found in env `{name}`"
                )));
            }
            status(host.putenv(&name))
        }

        BridgeRequest::GetEnv { name } => BridgeResponse::StatusValue {
            code: ReturnCode::Success.as_raw(),
            value: host.getenv(&name).unwrap_or_default(),
        },

        BridgeRequest::GetEnvList => match host.env_list() {
            Some(entries) => {
                let mut env = BTreeMap::new();
                for entry in entries {
                    // Entries without an `=` are skipped, not errors.
                    if let Some((name, value)) = entry.split_once('=') {
                        env.insert(name.to_string(), value.to_string());
                    }
                }
                BridgeResponse::EnvList {
                    code: ReturnCode::Success.as_raw(),
                    env,
                }
            }
            None => BridgeResponse::EnvList {
                code: ReturnCode::BufErr.as_raw(),
                env: BTreeMap::new(),
            },
        },

        BridgeRequest::SetData { key, value } => status(host.set_data(&data_key(&key), value)),

        BridgeRequest::UnsetData { key } => status(host.unset_data(&data_key(&key))),

        BridgeRequest::GetData { key } => {
            let (code, value) = host.get_data(&data_key(&key));
            BridgeResponse::Data {
                code: code.as_raw(),
                value: match value {
                    Some(value) => DataValue::Present { value },
                    None => DataValue::Absent,
                },
            }
        }

        BridgeRequest::Prompt { style, msg } => {
            let Some(style) = MessageStyle::from_raw(style).filter(|s| *s != MessageStyle::Binary)
            else {
                return protocol_error(ProtocolError::InvalidArgument(format!(
                    "invalid prompt style {style}"
                )));
            };
            match host.converse(ConvRequest::Text { style, msg }) {
                Ok(ConvResponse::Text(response)) => BridgeResponse::StatusValue {
                    code: ReturnCode::Success.as_raw(),
                    value: response,
                },
                Ok(ConvResponse::Binary(_)) => BridgeResponse::StatusValue {
                    code: ReturnCode::ConvErr.as_raw(),
                    value: String::new(),
                },
                Err(code) => BridgeResponse::StatusValue {
                    code: code.as_raw(),
                    value: String::new(),
                },
            }
        }

        BridgeRequest::JsonConversation { data } => {
            json_conversation(host, extension_type, data)
        }

        BridgeRequest::Unknown => protocol_error(ProtocolError::UnknownMethod(
            "unrecognized method name".to_string(),
        )),
    }
}

/// One JSON-extension round trip: wrap the payload in an extension record,
/// run it through the binary prompt, validate the single reply.
fn json_conversation(
    host: &mut dyn HostTransaction,
    extension_type: Option<u32>,
    data: Vec<u8>,
) -> BridgeResponse {
    let Some(msg_type) = extension_type else {
        tracing::warn!("JSON extension is not supported by the host");
        return protocol_error(ProtocolError::ExtensionNotSupported(
            JSON_EXTENSION.to_string(),
        ));
    };

    let request = ExtensionRecord::new(msg_type, JSON_PROTO_NAME, JSON_PROTO_VERSION, data);
    let reply = match host.converse(ConvRequest::Binary(request.encode())) {
        Ok(ConvResponse::Binary(bytes)) => bytes,
        Ok(ConvResponse::Text(_)) => {
            return protocol_error(ProtocolError::InvalidReply(
                "conversation reply is not binary".to_string(),
            ));
        }
        Err(code) => {
            tracing::warn!(%code, "binary conversation produced no reply");
            return protocol_error(ProtocolError::NoConversationReply);
        }
    };

    let record = match ExtensionRecord::decode(&reply) {
        Ok(record) => record,
        Err(err) => return protocol_error(err),
    };
    if let Err(err) = record.expect_matching(JSON_PROTO_NAME, JSON_PROTO_VERSION) {
        return protocol_error(err);
    }

    BridgeResponse::Bytes { data: record.value }
}
