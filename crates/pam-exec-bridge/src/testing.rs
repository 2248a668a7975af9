//! In-memory [`HostTransaction`] used by the crate's own tests and by
//! downstream harnesses that emulate a host application.

use std::collections::HashMap;

use crate::host::{ConvRequest, ConvResponse, HostTransaction, Item, ReturnCode};

type ConvHandler = Box<dyn FnMut(ConvRequest) -> Result<ConvResponse, ReturnCode> + Send>;

/// Map-backed transaction double. Environment entries are kept as raw
/// `NAME=VALUE` strings so tests can inject malformed ones.
#[derive(Default)]
pub struct DummyTransaction {
    items: HashMap<Item, String>,
    env: Vec<String>,
    data: HashMap<String, serde_json::Value>,
    conv: Option<ConvHandler>,
    /// When false, `env_list` reports failure.
    env_list_available: bool,
    /// Messages shown via `error_msg`, newest last.
    pub shown_errors: Vec<String>,
}

impl DummyTransaction {
    pub fn new() -> Self {
        Self {
            env_list_available: true,
            ..Self::default()
        }
    }

    /// Install a conversation handler answering every message.
    pub fn with_conv(
        mut self,
        conv: impl FnMut(ConvRequest) -> Result<ConvResponse, ReturnCode> + Send + 'static,
    ) -> Self {
        self.conv = Some(Box::new(conv));
        self
    }

    /// Seed a raw environment entry, malformed ones included.
    pub fn push_env_entry(&mut self, entry: impl Into<String>) {
        self.env.push(entry.into());
    }

    /// Make `env_list` fail, as when the framework cannot allocate it.
    pub fn break_env_list(&mut self) {
        self.env_list_available = false;
    }

    pub fn data_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.data.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn env_position(&self, name: &str) -> Option<usize> {
        self.env.iter().position(|entry| {
            entry
                .split_once('=')
                .map_or(entry.as_str() == name, |(n, _)| n == name)
        })
    }
}

impl HostTransaction for DummyTransaction {
    fn set_item(&mut self, item: Item, value: &str) -> ReturnCode {
        self.items.insert(item, value.to_string());
        ReturnCode::Success
    }

    fn get_item(&self, item: Item) -> (ReturnCode, String) {
        match self.items.get(&item) {
            Some(value) => (ReturnCode::Success, value.clone()),
            None => (ReturnCode::Success, String::new()),
        }
    }

    fn putenv(&mut self, name_value: &str) -> ReturnCode {
        match name_value.split_once('=') {
            Some((name, _)) => {
                if let Some(idx) = self.env_position(name) {
                    self.env[idx] = name_value.to_string();
                } else {
                    self.env.push(name_value.to_string());
                }
                ReturnCode::Success
            }
            // A bare name deletes the entry, like pam_putenv.
            None => match self.env_position(name_value) {
                Some(idx) => {
                    self.env.remove(idx);
                    ReturnCode::Success
                }
                None => ReturnCode::BadItem,
            },
        }
    }

    fn getenv(&self, name: &str) -> Option<String> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(n, _)| *n == name)
                .map(|(_, v)| v.to_string())
        })
    }

    fn env_list(&self) -> Option<Vec<String>> {
        if !self.env_list_available {
            return None;
        }
        Some(self.env.clone())
    }

    fn set_data(&mut self, key: &str, value: serde_json::Value) -> ReturnCode {
        self.data.insert(key.to_string(), value);
        ReturnCode::Success
    }

    fn unset_data(&mut self, key: &str) -> ReturnCode {
        self.data.remove(key);
        ReturnCode::Success
    }

    fn get_data(&self, key: &str) -> (ReturnCode, Option<serde_json::Value>) {
        match self.data.get(key) {
            Some(value) => (ReturnCode::Success, Some(value.clone())),
            None => (ReturnCode::NoModuleData, None),
        }
    }

    fn converse(&mut self, req: ConvRequest) -> Result<ConvResponse, ReturnCode> {
        match self.conv.as_mut() {
            Some(conv) => conv(req),
            None => Err(ReturnCode::ConvErr),
        }
    }

    fn error_msg(&mut self, msg: &str) {
        self.shown_errors.push(msg.to_string());
    }
}
