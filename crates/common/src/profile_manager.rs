// SMB Launcher - Profile Manager Module
// Ordered profile list held in memory and mirrored to a JSON file

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ServerProfile;
use crate::error::{Error, Result};

/// Ordered list of server profiles backed by a single JSON file
///
/// Identity of a profile is its position in the list. Every mutation is
/// validated first and persisted before returning; when persisting fails the
/// in-memory list is restored so it never diverges from disk.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<ServerProfile>,
}

impl ProfileStore {
    /// Open the store at `path`, loading any existing profiles
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let profiles = Self::load(&path)?;
        Ok(Self { path, profiles })
    }

    /// Read the persisted profile list
    ///
    /// A missing file is an empty list. Malformed content is reported as
    /// [`Error::Config`] and the file is left untouched.
    pub fn load(path: &Path) -> Result<Vec<ServerProfile>> {
        if !path.exists() {
            debug!("Profile file does not exist: {}", path.display());
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(path)?;
        let profiles: Vec<ServerProfile> = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        debug!("Loaded {} profile(s) from {}", profiles.len(), path.display());
        Ok(profiles)
    }

    /// Atomically replace the persisted file with the in-memory list
    pub fn persist(&self) -> Result<()> {
        save_profiles(&self.path, &self.profiles)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> &[ServerProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&ServerProfile> {
        self.profiles.get(index).ok_or(Error::Index {
            index,
            len: self.profiles.len(),
        })
    }

    /// Position of the profile with exactly this name
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.name == name)
    }

    /// Append a profile; returns its position
    pub fn add(&mut self, profile: ServerProfile) -> Result<usize> {
        profile.validate()?;
        self.ensure_unique_name(&profile.name, None)?;

        self.profiles.push(profile);
        if let Err(e) = self.persist() {
            self.profiles.pop();
            return Err(e);
        }

        let index = self.profiles.len() - 1;
        info!("Added profile '{}' at {}", self.profiles[index].name, index);
        Ok(index)
    }

    /// Replace the profile at `index`
    pub fn edit(&mut self, index: usize, profile: ServerProfile) -> Result<()> {
        self.check_index(index)?;
        profile.validate()?;
        self.ensure_unique_name(&profile.name, Some(index))?;

        let previous = std::mem::replace(&mut self.profiles[index], profile);
        if let Err(e) = self.persist() {
            self.profiles[index] = previous;
            return Err(e);
        }

        info!("Updated profile '{}' at {}", self.profiles[index].name, index);
        Ok(())
    }

    /// Remove and return the profile at `index`
    pub fn delete(&mut self, index: usize) -> Result<ServerProfile> {
        self.check_index(index)?;

        let removed = self.profiles.remove(index);
        if let Err(e) = self.persist() {
            self.profiles.insert(index, removed);
            return Err(e);
        }

        info!("Deleted profile '{}' from {}", removed.name, index);
        Ok(removed)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.profiles.len() {
            return Err(Error::Index {
                index,
                len: self.profiles.len(),
            });
        }
        Ok(())
    }

    fn ensure_unique_name(&self, name: &str, exclude: Option<usize>) -> Result<()> {
        let taken = self
            .profiles
            .iter()
            .enumerate()
            .any(|(i, p)| p.name == name && Some(i) != exclude);
        if taken {
            return Err(Error::ProfileExists(name.to_string()));
        }
        Ok(())
    }
}

/// Write `profiles` to `path` via a temp file in the same directory
fn save_profiles(path: &Path, profiles: &[ServerProfile]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let json = serde_json::to_vec_pretty(profiles)
        .map_err(|e| Error::Config(format!("Failed to serialize profiles: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;

    // Passwords are stored in clear text
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600)) {
            warn!("Failed to restrict permissions on {}: {}", tmp.path().display(), e);
        }
    }

    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    debug!("Saved {} profile(s) to {}", profiles.len(), path.display());
    Ok(())
}
