//! Master PID file.
//!
//! The file holds the master pid as plain text and exists only while the
//! master runs; its absence is how `stop` knows the server is down.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `pid`, creating missing parent directories with mode 0755.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.is_dir() {
                fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)?;
            }
        }
        fs::write(&self.path, pid.to_string())
    }

    /// The recorded pid, if the file exists and holds a positive integer.
    pub fn read(&self) -> Option<i32> {
        let content = fs::read_to_string(&self.path).ok()?;
        content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
    }

    /// Delete the file. Returns whether it existed.
    pub fn remove(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
