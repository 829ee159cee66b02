// Server profile record for SMB Launcher

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A named remote server entry with connection credentials
///
/// Serialized as a flat JSON object with exactly these four string fields;
/// the on-disk layout has no version field, so adding fields here breaks
/// existing stores.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ServerProfile {
    /// Human-readable profile name
    pub name: String,
    /// Server address, e.g. `smb://10.0.0.5/data`
    pub address: String,
    /// Login name, optionally `DOMAIN\user`
    pub username: String,
    /// Login password (stored in clear text)
    pub password: String,
}

impl ServerProfile {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Validate that every required field is present
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation { field: "name" });
        }
        if self.address.trim().is_empty() {
            return Err(Error::Validation { field: "address" });
        }
        if self.username.trim().is_empty() {
            return Err(Error::Validation { field: "username" });
        }
        if self.password.is_empty() {
            return Err(Error::Validation { field: "password" });
        }
        Ok(())
    }

    /// List entry label, `name (address)`
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.address)
    }
}

impl fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProfile")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}
