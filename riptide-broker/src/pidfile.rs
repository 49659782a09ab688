//! Pidfile handling.
//!
//! The daemon writes its PID on start and removes the file on stop. The
//! guard is RAII so the file is removed on any orderly exit path.

use riptide_core::{Error, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// RAII pidfile: created on construction, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| {
            Error::configuration(format!("failed to write pidfile {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), pid = std::process::id(), "pidfile written");
        Ok(Self { path })
    }

    /// The pidfile's path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pidfile");
        } else {
            debug!(path = %self.path.display(), "pidfile removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pidfile_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riptide.pid");

        let pidfile = PidFile::create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());

        drop(pidfile);
        assert!(!path.exists());
    }

    #[test]
    fn test_pidfile_create_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("riptide.pid");
        assert!(PidFile::create(path).is_err());
    }
}
