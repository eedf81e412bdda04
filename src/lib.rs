// Library root
// -----------
// This crate watches a folder for new recordings and publishes each one to
// Podbean. The binary (`main.rs`) wires these modules together.
//
// Module responsibilities:
// - `api`: HTTP calls to Podbean (token, upload authorize, transfer, episode
//   create) behind the `PodcastHost` trait.
// - `token`: owns the access token and refreshes it when it expires or is
//   rejected.
// - `metadata`: looks up episode title/description in the episode sheet.
// - `sink`: file naming rules, duplicate detection and archiving.
// - `upload`: the authorize -> transfer -> settle -> publish sequence.
// - `pipeline`: one run per detected file, from name check to archive.
// - `watcher`: turns folder events into pipeline runs.
// - `config`, `logging`, `ui`: startup plumbing and terminal output.
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod sink;
pub mod token;
pub mod ui;
pub mod upload;
pub mod watcher;

pub use error::{RemoteError, RemoteStep, UploadError};
