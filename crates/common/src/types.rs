// Common types for SMB Launcher

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Kind of resource a share exports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Disk,
    PrintQueue,
    Device,
    Ipc,
}

/// One share returned by remote enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareInfo {
    pub name: String,
    pub share_type: ShareType,
    /// Administrative share (`C$`, `ADMIN$`, `IPC$`, ...)
    pub special: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
}

impl ShareInfo {
    /// Plain disk share, the kind that can be mounted and browsed
    pub fn disk(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            share_type: ShareType::Disk,
            special: false,
            remark: String::new(),
        }
    }

    /// Decode the `STYPE_*` bit field of `SHARE_INFO_1`
    pub fn from_raw_type(name: String, raw: u32, remark: String) -> Self {
        const STYPE_SPECIAL: u32 = 0x8000_0000;
        let share_type = match raw & 0x0FFF_FFFF {
            0 => ShareType::Disk,
            1 => ShareType::PrintQueue,
            2 => ShareType::Device,
            _ => ShareType::Ipc,
        };
        Self {
            name,
            share_type,
            special: raw & STYPE_SPECIAL != 0,
            remark,
        }
    }

    pub fn is_browsable(&self) -> bool {
        self.share_type == ShareType::Disk && !self.special
    }
}

/// Step of a single connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Parsing,
    Connecting,
    Enumerating,
    ResolvingMount,
    OpeningBrowser,
    Done(PathBuf),
    Failed(ErrorKind),
}

impl ConnectState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectState::Done(_) | ConnectState::Failed(_))
    }
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectState::Idle => write!(f, "Idle"),
            ConnectState::Parsing => write!(f, "Parsing address"),
            ConnectState::Connecting => write!(f, "Connecting"),
            ConnectState::Enumerating => write!(f, "Listing shares"),
            ConnectState::ResolvingMount => write!(f, "Checking local mount"),
            ConnectState::OpeningBrowser => write!(f, "Opening file browser"),
            ConnectState::Done(path) => write!(f, "Opened {}", path.display()),
            ConnectState::Failed(kind) => write!(f, "Failed ({kind:?})"),
        }
    }
}

/// Successful outcome of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedShare {
    /// Share that was opened
    pub share: String,
    /// Local path the share is mounted at
    pub local_path: PathBuf,
    /// Every share the server reported
    pub shares: Vec<ShareInfo>,
    /// Whether the file browser was asked to open the path
    pub opened: bool,
}
