// Error types for SMB Launcher

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing required field: {field}")]
    Validation { field: &'static str },

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("No profile at position {index} (have {len})")]
    Index { index: usize, len: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported address: {0}")]
    AddressFormat(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Share not found: {0}")]
    ShareNotFound(String),

    #[error("Local mount point not found: {}", path.display())]
    MountNotFound { path: PathBuf },

    #[error("Failed to open {}: {reason}", path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("A connection attempt is already in progress")]
    Busy,
}

/// Tag identifying which failure an [`Error`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ProfileExists,
    Index,
    Config,
    Io,
    AddressFormat,
    Auth,
    Network,
    Protocol,
    ShareNotFound,
    MountNotFound,
    OpenFailed,
    Busy,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::ProfileExists(_) => ErrorKind::ProfileExists,
            Error::Index { .. } => ErrorKind::Index,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::AddressFormat(_) => ErrorKind::AddressFormat,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Network(_) => ErrorKind::Network,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ShareNotFound(_) => ErrorKind::ShareNotFound,
            Error::MountNotFound { .. } => ErrorKind::MountNotFound,
            Error::OpenFailed { .. } => ErrorKind::OpenFailed,
            Error::Busy => ErrorKind::Busy,
        }
    }

    /// Single operator-facing message for display by a front-end
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { .. } => "All fields are required.".to_string(),
            Error::AddressFormat(_) => {
                format!("Only SMB connections are supported ({self}).")
            }
            Error::Auth(_) => format!("SMB connection failed: {self}"),
            Error::Network(_) => format!("SMB connection failed: {self}"),
            Error::Protocol(_) => format!("SMB connection failed: {self}"),
            Error::MountNotFound { path } => {
                let root = path
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                format!(
                    "Local mount point {} not found.\nMount the shared folder under {} manually first.",
                    path.display(),
                    root
                )
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(Error::Busy.kind(), ErrorKind::Busy);
        assert_eq!(
            Error::Validation { field: "name" }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::from(std::io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_mount_not_found_message_names_root() {
        let err = Error::MountNotFound {
            path: PathBuf::from("/Volumes/data"),
        };
        let msg = err.user_message();
        assert!(msg.contains("/Volumes/data"));
        assert!(msg.contains("under /Volumes"));
    }

    #[test]
    fn test_address_message_mentions_smb() {
        let err = Error::AddressFormat("http://host".to_string());
        assert!(err.user_message().contains("Only SMB"));
    }
}
