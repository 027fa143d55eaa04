use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("pidfile {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("pidfile {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Read-only view of a worker's pidfile. The first line holds the pid.
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

    pub fn read_pid(&self) -> Result<i32, PidFileError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PidFileError::Missing(self.path.clone()));
            }
            Err(e) => {
                return Err(PidFileError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        let line = text.lines().next().unwrap_or("").trim();
        let pid: i32 = line.parse().map_err(|e| PidFileError::Corrupt {
            path: self.path.clone(),
            reason: format!("{line:?}: {e}"),
        })?;
        if pid <= 0 {
            return Err(PidFileError::Corrupt {
                path: self.path.clone(),
                reason: format!("pid must be positive, got {pid}"),
            });
        }
        Ok(pid)
    }
}
