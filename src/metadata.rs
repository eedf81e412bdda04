// Episode metadata lookup.
//
// The sheet is re-read on every lookup, so rows can be added while the
// watcher is running.

use crate::error::UploadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Title and description for one episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub title: String,
    pub description: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EpisodeResolver: Send + Sync {
    /// Look up the episode for a 1-based data row index.
    async fn resolve(&self, index: u32) -> Result<EpisodeMetadata, UploadError>;
}

/// Reads a `;`-separated sheet with a header row followed by
/// `title;description` rows. Row 1 is the first row after the header.
pub struct CsvEpisodeResolver {
    path: PathBuf,
}

impl CsvEpisodeResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvEpisodeResolver { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find_row(&self, content: &[u8], index: u32) -> Result<EpisodeMetadata, UploadError> {
        let not_found = || UploadError::NotFound {
            index,
            path: self.path.clone(),
        };
        let position = index.checked_sub(1).ok_or_else(not_found)? as usize;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        let record = reader.records().nth(position).ok_or_else(not_found)??;
        let title = record.get(0).unwrap_or_default().to_string();
        let description = record.get(1).unwrap_or_default().to_string();
        if title.is_empty() || description.is_empty() {
            return Err(UploadError::IncompleteMetadata { index });
        }
        Ok(EpisodeMetadata { title, description })
    }
}

#[async_trait]
impl EpisodeResolver for CsvEpisodeResolver {
    async fn resolve(&self, index: u32) -> Result<EpisodeMetadata, UploadError> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|source| UploadError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.find_row(&content, index)
    }
}
