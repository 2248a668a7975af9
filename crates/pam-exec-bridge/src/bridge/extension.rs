//! Binary extension records and extension negotiation.
//!
//! The host's prompt mechanism is text-only except for one escape hatch: a
//! binary message style whose payload is an extension record. The record
//! layout follows the display-manager extension protocol:
//!
//! ```text
//! { type: u32 BE, length: u32 BE }   message header (length = whole record)
//! protocol_name: 64 bytes, NUL padded
//! version: u32 BE
//! value: remaining bytes
//! ```
//!
//! The `type` field is the extension's position in the advertised-extension
//! list the host application publishes through its environment block; a
//! host that never advertised the extension has no type for it and the
//! bridge must not attempt the round trip at all. Pure serialization, no
//! transport dependency.

use crate::error::ProtocolError;

/// Identifier of the JSON sub-protocol extension.
pub const JSON_EXTENSION: &str = "org.gnome.DisplayManager.UserVerifier.CustomJSON";

/// Identifier of the single-value raw-string sub-protocol.
pub const PRIVATE_STRING_EXTENSION: &str = "org.gnome.DisplayManager.UserVerifier.PrivateString";

/// Protocol name carried inside every JSON-extension record.
pub const JSON_PROTO_NAME: &str = "com.ubuntu.authd.gdm";

/// Version carried inside every JSON-extension record.
pub const JSON_PROTO_VERSION: u32 = 1;

/// Environment variable holding the advertised-extension block.
pub const SUPPORTED_EXTENSIONS_ENV: &str = "GDM_SUPPORTED_PAM_EXTENSIONS";

const HEADER_LEN: usize = 8;
const PROTO_NAME_LEN: usize = 64;
const FIXED_LEN: usize = HEADER_LEN + PROTO_NAME_LEN + 4;

/// One decoded extension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub msg_type: u32,
    pub protocol_name: String,
    pub version: u32,
    pub value: Vec<u8>,
}

impl ExtensionRecord {
    pub fn new(
        msg_type: u32,
        protocol_name: impl Into<String>,
        version: u32,
        value: Vec<u8>,
    ) -> Self {
        Self {
            msg_type,
            protocol_name: protocol_name.into(),
            version,
            value,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = FIXED_LEN + self.value.len();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&self.msg_type.to_be_bytes());
        buf.extend_from_slice(&(total as u32).to_be_bytes());

        let mut name = [0u8; PROTO_NAME_LEN];
        let bytes = self.protocol_name.as_bytes();
        // The last byte stays NUL so the name is always terminated.
        let n = bytes.len().min(PROTO_NAME_LEN - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        buf.extend_from_slice(&name);

        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FIXED_LEN {
            return Err(ProtocolError::InvalidReply(format!(
                "record too short: {} bytes",
                buf.len()
            )));
        }

        let msg_type = read_u32(buf, 0);
        let length = read_u32(buf, 4);
        if length as usize != buf.len() {
            return Err(ProtocolError::InvalidReply(format!(
                "length field {} does not match record size {}",
                length,
                buf.len()
            )));
        }

        let name_field = &buf[HEADER_LEN..HEADER_LEN + PROTO_NAME_LEN];
        let name_end = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PROTO_NAME_LEN);
        let protocol_name = std::str::from_utf8(&name_field[..name_end])
            .map_err(|_| ProtocolError::InvalidReply("protocol name is not UTF-8".to_string()))?
            .to_string();

        let version = read_u32(buf, HEADER_LEN + PROTO_NAME_LEN);

        Ok(Self {
            msg_type,
            protocol_name,
            version,
            value: buf[FIXED_LEN..].to_vec(),
        })
    }

    /// Check a reply against the record we sent. The mismatching name or
    /// version is reported, the payload never is.
    pub fn expect_matching(&self, name: &str, version: u32) -> Result<(), ProtocolError> {
        if self.protocol_name != name {
            return Err(ProtocolError::InvalidReply(format!(
                "unexpected protocol name `{}`",
                self.protocol_name
            )));
        }
        if self.version != version {
            return Err(ProtocolError::InvalidReply(format!(
                "unexpected protocol version {}",
                self.version
            )));
        }
        Ok(())
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(word)
}

/// Parse the advertised-extension block into identifiers.
pub fn parse_extension_block(block: &str) -> Vec<String> {
    block
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Message type for `extension` as advertised by the host application, or
/// `None` when the extension is unsupported.
pub fn extension_type(extension: &str) -> Option<u32> {
    let block = std::env::var(SUPPORTED_EXTENSIONS_ENV).ok()?;
    lookup_extension_type(&block, extension)
}

fn lookup_extension_type(block: &str, extension: &str) -> Option<u32> {
    parse_extension_block(block)
        .iter()
        .position(|id| id == extension)
        .map(|idx| idx as u32)
}
