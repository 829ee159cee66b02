// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SMB Launcher Contributors

// SMB Launcher - Common Library
// Profile storage, SMB share enumeration and the connection workflow

pub mod config;
pub mod error;
pub mod manager;
pub mod mount;
pub mod network;
pub mod orchestrator;
pub mod profile_manager;
pub mod settings;
pub mod smb;
pub mod types;

pub use config::ServerProfile;
pub use error::{Error, ErrorKind, Result};
pub use manager::{ServerManager, SystemServerManager};
pub use mount::{LocalFilesystem, MountResolver, SystemFilesystem};
pub use network::{parse_address, ShareAddress};
pub use orchestrator::{select_share, ConnectObserver, ConnectionOrchestrator, NoopObserver};
pub use profile_manager::ProfileStore;
pub use settings::{AppPaths, Settings};
pub use smb::{Credentials, ShareClient, ShareSession, SmbClient};
pub use types::{ConnectState, ConnectedShare, ShareInfo, ShareType};
