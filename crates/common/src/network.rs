// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SMB Launcher Contributors

// Address parsing for smb:// server addresses

use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};

/// The only supported address scheme
pub const SMB_SCHEME: &str = "smb://";

/// Components of an `smb://host[:port]/share` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareAddress {
    pub host: String,
    pub port: Option<u16>,
    pub share: Option<String>,
}

impl fmt::Display for ShareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SMB_SCHEME}")?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(share) = &self.share {
            write!(f, "/{share}")?;
        }
        Ok(())
    }
}

/// Split an address into host and optional share name
///
/// The scheme prefix is matched case-insensitively. Only the first path
/// segment is the share; anything after it is ignored.
pub fn parse_address(address: &str) -> Result<ShareAddress> {
    let address = address.trim();

    let rest = match address.get(..SMB_SCHEME.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SMB_SCHEME) => &address[SMB_SCHEME.len()..],
        _ => return Err(Error::AddressFormat(address.to_string())),
    };

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };

    let (host, port) = split_host_port(authority)
        .ok_or_else(|| Error::AddressFormat(address.to_string()))?;

    let mut segments = path.split('/');
    let share = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let remainder: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    if !remainder.is_empty() {
        debug!("Ignoring path below share in {}: {}", address, remainder.join("/"));
    }

    Ok(ShareAddress { host, port, share })
}

fn split_host_port(authority: &str) -> Option<(String, Option<u16>)> {
    if authority.is_empty() {
        return None;
    }

    // Bracketed IPv6 literal, optionally followed by :port
    if let Some(inner) = authority.strip_prefix('[') {
        let end = inner.find(']')?;
        let host = &inner[..end];
        let tail = &inner[end + 1..];
        let port = match tail {
            "" => None,
            t => Some(t.strip_prefix(':')?.parse::<u16>().ok()?),
        };
        return (!host.is_empty()).then(|| (host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        // A bare IPv6 literal has several colons and no port
        Some((host, _)) if host.contains(':') => Some((authority.to_string(), None)),
        Some((host, port)) => {
            let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
            (!host.is_empty()).then(|| (host.to_string(), Some(port)))
        }
        None => Some((authority.to_string(), None)),
    }
}
