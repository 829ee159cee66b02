// Local mount point lookup and file browser hand-off

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Operating-system side of a connection: path checks and the file browser
pub trait LocalFilesystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn open_in_browser(&self, path: &Path) -> Result<()>;
}

/// [`LocalFilesystem`] backed by the real filesystem and desktop opener
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFilesystem;

impl LocalFilesystem for SystemFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_in_browser(&self, path: &Path) -> Result<()> {
        debug!("Opening {} in the file browser", path.display());
        open::that(path).map_err(|e| Error::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Maps share names to the directory they are expected to be mounted at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountResolver {
    mount_root: PathBuf,
}

impl MountResolver {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
        }
    }

    /// Directory `share` is expected at under the mount root
    ///
    /// Names that would leave the mount root (separators, `.` or `..`) or are
    /// empty are rejected with `ShareNotFound`.
    pub fn resolve_local_path(&self, share: &str) -> Result<PathBuf> {
        if share.trim().is_empty()
            || share == "."
            || share == ".."
            || share.contains(['/', '\\'])
        {
            return Err(Error::ShareNotFound(format!("invalid share name {share:?}")));
        }
        Ok(self.mount_root.join(share))
    }

    pub fn is_mounted(&self, fs: &dyn LocalFilesystem, path: &Path) -> bool {
        fs.exists(path)
    }

    /// Local path of `share`, or `MountNotFound` if nothing is mounted there
    pub fn locate(&self, fs: &dyn LocalFilesystem, share: &str) -> Result<PathBuf> {
        let path = self.resolve_local_path(share)?;
        if self.is_mounted(fs, &path) {
            debug!("Share {} is mounted at {}", share, path.display());
            Ok(path)
        } else {
            Err(Error::MountNotFound { path })
        }
    }
}
