// Error types shared by every stage of an upload run.
//
// A run never lets one of these escape past `Pipeline::handle`; they are
// reported there together with the file name and the stage that was reached.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The remote call that produced a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStep {
    Authorize,
    Transfer,
    Publish,
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteStep::Authorize => "upload authorize",
            RemoteStep::Transfer => "file transfer",
            RemoteStep::Publish => "episode publish",
        };
        f.write_str(name)
    }
}

/// A non-success response from one of the three upload-protocol calls.
/// `code` and `description` are taken verbatim from the service's error body
/// when it has one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{step} failed (HTTP {status}, {code}): {description}")]
pub struct RemoteError {
    pub step: RemoteStep,
    pub status: u16,
    pub code: String,
    pub description: String,
}

impl RemoteError {
    /// Whether the service rejected the access token itself. The client only
    /// estimates expiry, so this can happen while the token still looks valid.
    pub fn is_token_rejected(&self) -> bool {
        self.status == 401 || self.code == "invalid_token"
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("token exchange failed ({code}): {description}")]
    Auth { code: String, description: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid file name {file_name}: expected <number>.mp3")]
    InvalidName { file_name: String },

    #[error("episode {index} does not exist in {}", .path.display())]
    NotFound { index: u32, path: PathBuf },

    #[error("episode {index} is missing a title or description")]
    IncompleteMetadata { index: u32 },

    #[error("could not move {} to {}: {source}", .from.display(), .to.display())]
    Filesystem {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse episode sheet: {0}")]
    Metadata(#[from] csv::Error),

    #[error("unexpected {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UploadError {
    /// The remote error behind this failure, if the service rejected a call.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            UploadError::Remote(err) => Some(err),
            _ => None,
        }
    }
}
