//! Host authentication framework capability interface.
//!
//! The bridge never talks to the framework directly. The host integration
//! (a PAM module shim, a display-manager emulator, a test harness)
//! implements [`HostTransaction`] and injects it per action; the dispatcher
//! only ever sees this trait. Item numbers, return codes and message styles
//! use the framework's own numbering so they can travel over the wire as
//! plain integers.

/// Per-handle item slots, numbered the way the framework numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Item {
    Service = 1,
    User = 2,
    Tty = 3,
    RHost = 4,
    Conv = 5,
    AuthTok = 6,
    OldAuthTok = 7,
    RUser = 8,
    UserPrompt = 9,
    FailDelay = 10,
    XDisplay = 11,
    XAuthData = 12,
    AuthTokType = 13,
}

impl Item {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Service),
            2 => Some(Self::User),
            3 => Some(Self::Tty),
            4 => Some(Self::RHost),
            5 => Some(Self::Conv),
            6 => Some(Self::AuthTok),
            7 => Some(Self::OldAuthTok),
            8 => Some(Self::RUser),
            9 => Some(Self::UserPrompt),
            10 => Some(Self::FailDelay),
            11 => Some(Self::XDisplay),
            12 => Some(Self::XAuthData),
            13 => Some(Self::AuthTokType),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Framework return values. The helper's exit status is reinterpreted as
/// one of these, which is why [`MAX_RETURN_VALUE`] must stay below 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReturnCode {
    Success = 0,
    OpenErr = 1,
    SymbolErr = 2,
    ServiceErr = 3,
    SystemErr = 4,
    BufErr = 5,
    PermDenied = 6,
    AuthErr = 7,
    CredInsufficient = 8,
    AuthInfoUnavail = 9,
    UserUnknown = 10,
    MaxTries = 11,
    NewAuthTokReqd = 12,
    AcctExpired = 13,
    SessionErr = 14,
    CredUnavail = 15,
    CredExpired = 16,
    CredErr = 17,
    NoModuleData = 18,
    ConvErr = 19,
    AuthTokErr = 20,
    AuthTokRecoveryErr = 21,
    AuthTokLockBusy = 22,
    AuthTokDisableAging = 23,
    TryAgain = 24,
    Ignore = 25,
    Abort = 26,
    AuthTokExpired = 27,
    ModuleUnknown = 28,
    BadItem = 29,
    ConvAgain = 30,
    Incomplete = 31,
}

/// One past the highest valid return value. Exit statuses at or above this
/// are substituted with [`ReturnCode::SystemErr`].
pub const MAX_RETURN_VALUE: i32 = 32;

impl ReturnCode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        use ReturnCode::*;
        const ALL: [ReturnCode; 32] = [
            Success,
            OpenErr,
            SymbolErr,
            ServiceErr,
            SystemErr,
            BufErr,
            PermDenied,
            AuthErr,
            CredInsufficient,
            AuthInfoUnavail,
            UserUnknown,
            MaxTries,
            NewAuthTokReqd,
            AcctExpired,
            SessionErr,
            CredUnavail,
            CredExpired,
            CredErr,
            NoModuleData,
            ConvErr,
            AuthTokErr,
            AuthTokRecoveryErr,
            AuthTokLockBusy,
            AuthTokDisableAging,
            TryAgain,
            Ignore,
            Abort,
            AuthTokExpired,
            ModuleUnknown,
            BadItem,
            ConvAgain,
            Incomplete,
        ];
        if (0..MAX_RETURN_VALUE).contains(&raw) {
            Some(ALL[raw as usize])
        } else {
            None
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_raw())
    }
}

/// Conversation message styles. `Binary` is the display-manager extension
/// style used to carry opaque payloads through the prompt mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageStyle {
    PromptEchoOff = 1,
    PromptEchoOn = 2,
    ErrorMsg = 3,
    TextInfo = 4,
    Binary = 7,
}

impl MessageStyle {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::PromptEchoOff),
            2 => Some(Self::PromptEchoOn),
            3 => Some(Self::ErrorMsg),
            4 => Some(Self::TextInfo),
            7 => Some(Self::Binary),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// One message handed to the framework's conversation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvRequest {
    Text { style: MessageStyle, msg: String },
    Binary(Vec<u8>),
}

/// The single reply the callback produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvResponse {
    Text(String),
    Binary(Vec<u8>),
}

/// The framework primitives one action runs against.
///
/// Synchronous by contract: the framework's conversation callback blocks
/// until the user (or the calling application) answers, and so do we.
pub trait HostTransaction: Send {
    /// Store an item. Mirrors `pam_set_item`.
    fn set_item(&mut self, item: Item, value: &str) -> ReturnCode;

    /// Fetch an item; absent items read as the empty string.
    fn get_item(&self, item: Item) -> (ReturnCode, String);

    /// Add `NAME=VALUE` to the per-handle environment, or delete `NAME`
    /// when no `=` is present. Mirrors `pam_putenv`.
    fn putenv(&mut self, name_value: &str) -> ReturnCode;

    /// Read one environment entry by name.
    fn getenv(&self, name: &str) -> Option<String>;

    /// Snapshot of the raw `NAME=VALUE` entries, or `None` when the list
    /// cannot be obtained.
    fn env_list(&self) -> Option<Vec<String>>;

    /// Attach opaque data under `key`. Replacing a value releases the old
    /// one; the handle teardown releases whatever is left.
    fn set_data(&mut self, key: &str, value: serde_json::Value) -> ReturnCode;

    /// Clear the data stored under `key`.
    fn unset_data(&mut self, key: &str) -> ReturnCode;

    /// Read back opaque data. `None` when nothing is stored.
    fn get_data(&self, key: &str) -> (ReturnCode, Option<serde_json::Value>);

    /// Run the conversation callback with a single message and collect its
    /// single reply. `Err` carries the framework's conversation error code.
    fn converse(&mut self, req: ConvRequest) -> Result<ConvResponse, ReturnCode>;

    /// Show an error to an interactive user. Failures are ignored.
    fn error_msg(&mut self, msg: &str);
}
