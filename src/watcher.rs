// Folder watching and run dispatch.
//
// The notify callback only forwards paths into a channel; `dispatch` drains
// that channel and spawns one independent task per added file, so a slow or
// failing upload never holds up the watcher or other runs.

use crate::pipeline::Pipeline;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A watch on one directory, producing the paths of files added to it.
/// Files present before the watch started are not reported.
pub struct FolderWatcher {
    // Dropping the watcher stops the watch
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<PathBuf>,
}

impl FolderWatcher {
    pub fn watch(dir: &Path) -> notify::Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in added_paths(&event) {
                    if tx.send(path).is_err() {
                        break;
                    }
                }
            }
            Err(err) => warn!(error = %err, "folder watch error"),
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching for new files");
        Ok(FolderWatcher {
            _watcher: watcher,
            events,
        })
    }

    /// Wait for the next added file.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.events.recv().await
    }
}

/// Paths that an event reports as newly added to the folder: created files
/// and the destination of a rename. Hidden files are dropped.
pub fn added_paths(event: &Event) -> Vec<PathBuf> {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => &event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1..).unwrap_or_default()
        }
        _ => &[],
    };
    paths.iter().filter(|p| !is_hidden(p)).cloned().collect()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'))
}

/// Run the pipeline for every file the watcher reports, each in its own task.
/// Returns when the watcher's channel closes.
pub async fn dispatch(watcher: FolderWatcher, pipeline: Arc<Pipeline>) {
    let FolderWatcher {
        _watcher: _keep_alive,
        events,
    } = watcher;
    spawn_runs(events, pipeline).await;
}

async fn spawn_runs(mut paths: mpsc::UnboundedReceiver<PathBuf>, pipeline: Arc<Pipeline>) {
    while let Some(path) = paths.recv().await {
        debug!(path = %path.display(), "file added");
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline.handle(&path).await;
        });
    }
}
