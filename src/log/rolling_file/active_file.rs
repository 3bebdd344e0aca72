use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, error};

use crate::log::rolling_format::{compute_path, RollingFormat};

use super::WORKER_TARGET;

/// The file currently receiving pages. Owned by the flush worker only.
///
/// # Fields
///
/// * `base_path` - directory + file stem every rotated path is derived from
/// * `current_link` - optional symlink repointed at each newly opened file
/// * `file` - open handle, `None` before the first write or after a failed rotation
/// * `path` - path of the open file
/// * `fragment` - rotation fragment of the open file
#[derive(Debug)]
pub struct ActiveFile {
    base_path: PathBuf,
    current_link: Option<PathBuf>,
    file: Option<File>,
    path: PathBuf,
    fragment: String,
}

impl ActiveFile {
    pub fn new(base_path: PathBuf, current_link: Option<PathBuf>) -> Self {
        Self {
            base_path,
            current_link,
            file: None,
            path: PathBuf::new(),
            fragment: String::new(),
        }
    }

    /// Makes sure the open file belongs to the interval containing `now`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - a new file was opened
    /// * `Ok(false)` - the open file was reused
    ///
    /// # Errors
    ///
    /// Returns error when the directory cannot be created or the file cannot be
    /// opened; the worker is left without an open file and retries on the next page.
    fn roll(&mut self, format: RollingFormat, now: &NaiveDateTime) -> io::Result<bool> {
        let fragment = format.fragment(now);
        if self.file.is_some() {
            if fragment == self.fragment {
                return Ok(false);
            }
            // dropping the handle closes it
            self.file = None;
        }

        let target = compute_path(&self.base_path, format, now);
        if !target.dir.as_os_str().is_empty() {
            fs::create_dir_all(&target.dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target.file)?;

        debug!(target: WORKER_TARGET, "rolled to {}", target.file.display());
        self.file = Some(file);
        self.path = target.file;
        self.fragment = target.fragment;
        self.link_current();
        Ok(true)
    }

    #[cfg(unix)]
    fn link_current(&self) {
        let Some(link) = self.current_link.as_deref() else {
            return;
        };
        if link == self.path.as_path() {
            return;
        }
        if fs::symlink_metadata(link).is_ok() {
            let _ = fs::remove_file(link);
        }
        let target = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        if let Err(e) = std::os::unix::fs::symlink(&target, link) {
            error!(target: WORKER_TARGET, "link {} -> {} failed: {}", link.display(), target.display(), e);
        }
    }

    #[cfg(not(unix))]
    fn link_current(&self) {}

    /// Appends one page, rotating first when the interval changed.
    ///
    /// Returns whether a new file was opened. Empty pages never touch the disk.
    pub fn write_page(
        &mut self,
        data: &[u8],
        format: RollingFormat,
        now: &NaiveDateTime,
    ) -> io::Result<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        let rotated = self.roll(format, now)?;
        match self.file.as_mut() {
            Some(file) => file.write_all(data)?,
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "no open log file")),
        }
        Ok(rotated)
    }

    /// Flushes the open file to disk; a no-op before the first write.
    pub fn sync(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => {
                file.flush()?;
                file.sync_all()
            }
            None => Ok(()),
        }
    }

    pub fn close(&mut self) -> io::Result<()> {
        let result = self.sync();
        self.file = None;
        result
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|_| self.path.as_path())
    }
}
