// File naming, idempotency and archiving for the watched folder.
//
// A file named `<n>.mp3` belongs to row `n` of the episode sheet. Once it is
// published it is moved to the archive folder; a same-named file in the
// archive means the episode was already uploaded.

use crate::error::UploadError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const AUDIO_EXTENSION: &str = "mp3";

/// A detected audio file that passed name validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub file_name: String,
    pub index: u32,
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
}

/// Result of checking a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameCheck {
    Accepted(PendingFile),
    /// Not an audio file (or a hidden one); nothing to report.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct FileSink {
    watch_dir: PathBuf,
    archive_dir: PathBuf,
}

impl FileSink {
    pub fn new(watch_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        FileSink {
            watch_dir: watch_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Create the archive folder if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|source| UploadError::Io {
                path: self.archive_dir.clone(),
                source,
            })
    }

    /// Check a file name against the `<number>.mp3` convention.
    ///
    /// Names with another extension are ignored. An `.mp3` whose leading
    /// segment is not a number is an `InvalidName` error.
    pub fn validate(&self, file_name: &str) -> Result<NameCheck, UploadError> {
        if file_name.starts_with('.') {
            return Ok(NameCheck::Ignored);
        }
        let Some((stem, extension)) = file_name.rsplit_once('.') else {
            return Ok(NameCheck::Ignored);
        };
        if !extension.eq_ignore_ascii_case(AUDIO_EXTENSION) {
            debug!(file = file_name, "not an audio file");
            return Ok(NameCheck::Ignored);
        }

        let leading = stem.split('.').next().unwrap_or_default();
        let invalid = || UploadError::InvalidName {
            file_name: file_name.to_string(),
        };
        if leading.is_empty() || !leading.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let index = leading.parse::<u32>().map_err(|_| invalid())?;

        Ok(NameCheck::Accepted(PendingFile {
            file_name: file_name.to_string(),
            index,
            source_path: self.watch_dir.join(file_name),
            archive_path: self.archive_dir.join(file_name),
        }))
    }

    /// True if a file with this name is already in the archive folder. An
    /// archive folder that cannot be inspected is an error, not a "no".
    pub async fn is_already_processed(&self, file_name: &str) -> Result<bool, UploadError> {
        let archived = self.archive_dir.join(file_name);
        tokio::fs::try_exists(&archived)
            .await
            .map_err(|source| UploadError::Io {
                path: archived,
                source,
            })
    }

    /// Move a published file into the archive folder.
    pub async fn archive(&self, file: &PendingFile) -> Result<(), UploadError> {
        tokio::fs::rename(&file.source_path, &file.archive_path)
            .await
            .map_err(|source| UploadError::Filesystem {
                from: file.source_path.clone(),
                to: file.archive_path.clone(),
                source,
            })
    }
}
