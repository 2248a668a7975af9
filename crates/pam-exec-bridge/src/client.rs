//! Helper-side client.
//!
//! Helpers written in Rust link this to talk back to the bridge: connect
//! to the `-server-address` socket, then issue typed calls. Every call is
//! one request frame followed by one reply frame; the bridge never pushes
//! unsolicited frames.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::bridge::codec::FrameCodec;
use crate::bridge::protocol::{BridgeRequest, BridgeResponse, ErrorKind};
use crate::host::{Item, MessageStyle, ReturnCode};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("bridge closed the connection")]
    Closed,

    #[error("unexpected reply shape")]
    UnexpectedReply,

    #[error("bridge reported status {0}")]
    InvalidStatus(i32),

    #[error("call failed ({kind:?}): {message}")]
    Call { kind: ErrorKind, message: String },
}

pub struct HelperClient {
    framed: Framed<UnixStream, FrameCodec<BridgeResponse, BridgeRequest>>,
}

impl HelperClient {
    pub async fn connect(address: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(address.as_ref())
            .await
            .map_err(ClientError::Connect)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::default()),
        }
    }

    async fn call(&mut self, req: BridgeRequest) -> Result<BridgeResponse, ClientError> {
        self.framed.send(req).await?;
        match self.framed.next().await {
            Some(Ok(BridgeResponse::Error { kind, message })) => {
                Err(ClientError::Call { kind, message })
            }
            Some(Ok(resp)) => Ok(resp),
            Some(Err(err)) => Err(err.into()),
            None => Err(ClientError::Closed),
        }
    }

    fn code(raw: i32) -> Result<ReturnCode, ClientError> {
        ReturnCode::from_raw(raw).ok_or(ClientError::InvalidStatus(raw))
    }

    pub async fn set_item(&mut self, item: Item, value: &str) -> Result<ReturnCode, ClientError> {
        match self
            .call(BridgeRequest::SetItem {
                item: item.as_raw(),
                value: value.to_string(),
            })
            .await?
        {
            BridgeResponse::Status { code } => Self::code(code),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn get_item(&mut self, item: Item) -> Result<(ReturnCode, String), ClientError> {
        match self
            .call(BridgeRequest::GetItem {
                item: item.as_raw(),
            })
            .await?
        {
            BridgeResponse::StatusValue { code, value } => Ok((Self::code(code)?, value)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn set_env(&mut self, name: &str, value: &str) -> Result<ReturnCode, ClientError> {
        match self
            .call(BridgeRequest::SetEnv {
                name: name.to_string(),
                value: value.to_string(),
            })
            .await?
        {
            BridgeResponse::Status { code } => Self::code(code),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn unset_env(&mut self, name: &str) -> Result<ReturnCode, ClientError> {
        match self
            .call(BridgeRequest::UnsetEnv {
                name: name.to_string(),
            })
            .await?
        {
            BridgeResponse::Status { code } => Self::code(code),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Unset variables read back as the empty string.
    pub async fn get_env(&mut self, name: &str) -> Result<String, ClientError> {
        match self
            .call(BridgeRequest::GetEnv {
                name: name.to_string(),
            })
            .await?
        {
            BridgeResponse::StatusValue { code, value } => {
                Self::code(code)?;
                Ok(value)
            }
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn get_env_list(
        &mut self,
    ) -> Result<(ReturnCode, BTreeMap<String, String>), ClientError> {
        match self.call(BridgeRequest::GetEnvList).await? {
            BridgeResponse::EnvList { code, env } => Ok((Self::code(code)?, env)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn set_data(
        &mut self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<ReturnCode, ClientError> {
        match self
            .call(BridgeRequest::SetData {
                key: key.to_string(),
                value,
            })
            .await?
        {
            BridgeResponse::Status { code } => Self::code(code),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn unset_data(&mut self, key: &str) -> Result<ReturnCode, ClientError> {
        match self
            .call(BridgeRequest::UnsetData {
                key: key.to_string(),
            })
            .await?
        {
            BridgeResponse::Status { code } => Self::code(code),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn get_data(
        &mut self,
        key: &str,
    ) -> Result<(ReturnCode, Option<serde_json::Value>), ClientError> {
        match self
            .call(BridgeRequest::GetData {
                key: key.to_string(),
            })
            .await?
        {
            BridgeResponse::Data { code, value } => Ok((Self::code(code)?, value.into_option())),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn prompt(
        &mut self,
        style: MessageStyle,
        msg: &str,
    ) -> Result<(ReturnCode, String), ClientError> {
        match self
            .call(BridgeRequest::Prompt {
                style: style.as_raw(),
                msg: msg.to_string(),
            })
            .await?
        {
            BridgeResponse::StatusValue { code, value } => Ok((Self::code(code)?, value)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// One structured round trip through the display-manager extension.
    pub async fn json_conversation(&mut self, data: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        match self.call(BridgeRequest::JsonConversation { data }).await? {
            BridgeResponse::Bytes { data } => Ok(data),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}
