// One run per detected file:
//
//   Detected -> NameValid -> NotAlreadyArchived -> TokenReady ->
//   MetadataResolved -> Authorized -> Transferred -> Settled -> Published ->
//   Archived
//
// Any failure abandons the run where it is. Errors stop at `Pipeline::handle`:
// they are logged with the file name and the last stage reached, and the file
// is left in place so it can be retried by adding it again.

use crate::api::{PodcastHost, PublishedEpisode};
use crate::config::Config;
use crate::error::UploadError;
use crate::metadata::{CsvEpisodeResolver, EpisodeResolver};
use crate::sink::{FileSink, NameCheck};
use crate::token::{RunToken, TokenManager};
use crate::upload::UploadOrchestrator;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The last state a run reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detected,
    NameValid,
    NotAlreadyArchived,
    TokenReady,
    MetadataResolved,
    Authorized,
    Transferred,
    Settled,
    Published,
    Archived,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detected => "detected",
            Stage::NameValid => "name valid",
            Stage::NotAlreadyArchived => "not yet archived",
            Stage::TokenReady => "token ready",
            Stage::MetadataResolved => "metadata resolved",
            Stage::Authorized => "upload authorized",
            Stage::Transferred => "file transferred",
            Stage::Settled => "settled",
            Stage::Published => "published",
            Stage::Archived => "archived",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not `*.mp3`, or a hidden file.
    NotAudio,
    AlreadyArchived,
    /// Another run for the same file name is still going.
    InFlight,
}

#[derive(Debug)]
pub enum RunOutcome {
    Skipped(SkipReason),
    /// The episode exists remotely. `archived` is false when moving the file
    /// afterwards failed.
    Published {
        episode: PublishedEpisode,
        archived: bool,
    },
    Abandoned {
        reached: Stage,
        error: UploadError,
    },
}

pub struct Pipeline {
    sink: FileSink,
    tokens: Arc<TokenManager>,
    resolver: Arc<dyn EpisodeResolver>,
    orchestrator: UploadOrchestrator,
    in_flight: Mutex<HashSet<String>>,
}

/// Removes a file name from the in-flight set when its run ends.
pub struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    file_name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.file_name);
        }
    }
}

impl Pipeline {
    pub fn new(
        sink: FileSink,
        tokens: Arc<TokenManager>,
        resolver: Arc<dyn EpisodeResolver>,
        orchestrator: UploadOrchestrator,
    ) -> Self {
        Pipeline {
            sink,
            tokens,
            resolver,
            orchestrator,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Wire up a pipeline for `config`, sharing `tokens` with the caller so
    /// the startup token is reused by the first run.
    pub fn from_config(
        config: &Config,
        host: Arc<dyn PodcastHost>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Pipeline::new(
            FileSink::new(&config.watch_dir, &config.archive_dir),
            tokens,
            Arc::new(CsvEpisodeResolver::new(&config.csv_path)),
            UploadOrchestrator::new(host, config.episode_status, config.settle_delay),
        )
    }

    pub fn sink(&self) -> &FileSink {
        &self.sink
    }

    /// Process one add-event. Never fails: every error is reported here.
    pub async fn handle(&self, path: &Path) -> RunOutcome {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            debug!(path = %path.display(), "ignoring path without a usable file name");
            return RunOutcome::Skipped(SkipReason::NotAudio);
        };
        let span = info_span!("run", file = file_name);
        self.handle_named(file_name).instrument(span).await
    }

    async fn handle_named(&self, file_name: &str) -> RunOutcome {
        let Some(_guard) = self.claim(file_name) else {
            debug!("run already in progress for this file");
            return RunOutcome::Skipped(SkipReason::InFlight);
        };

        let mut stage = Stage::Detected;
        match self.run(file_name, &mut stage).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(stage = %stage, error = %err, "run abandoned, file left in place");
                RunOutcome::Abandoned {
                    reached: stage,
                    error: err,
                }
            }
        }
    }

    /// Reserve `file_name` for a run; `None` if it is already reserved.
    pub fn claim(&self, file_name: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(file_name.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            file_name: file_name.to_string(),
        })
    }

    async fn run(&self, file_name: &str, stage: &mut Stage) -> Result<RunOutcome, UploadError> {
        let file = match self.sink.validate(file_name)? {
            NameCheck::Accepted(file) => file,
            NameCheck::Ignored => {
                debug!("not an mp3 file, ignoring");
                return Ok(RunOutcome::Skipped(SkipReason::NotAudio));
            }
        };
        *stage = Stage::NameValid;
        info!(index = file.index, "new episode file detected");

        if self.sink.is_already_processed(file_name).await? {
            warn!("file already uploaded (present in archive folder), ignoring");
            return Ok(RunOutcome::Skipped(SkipReason::AlreadyArchived));
        }
        *stage = Stage::NotAlreadyArchived;

        let mut token = RunToken::new(&self.tokens, self.tokens.acquire().await?);
        *stage = Stage::TokenReady;

        let metadata = self.resolver.resolve(file.index).await?;
        *stage = Stage::MetadataResolved;
        info!(title = %metadata.title, "episode metadata resolved");

        let episode = self
            .orchestrator
            .publish(&mut token, &file, &metadata, stage)
            .await?;

        // The episode is live at this point; a failed move is only reported.
        let archived = match self.sink.archive(&file).await {
            Ok(()) => {
                *stage = Stage::Archived;
                info!(to = %file.archive_path.display(), "file archived");
                true
            }
            Err(err) => {
                error!(error = %err, "episode published but file could not be archived");
                false
            }
        };
        Ok(RunOutcome::Published { episode, archived })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EpisodeStatus, MockPodcastHost, TokenGrant, UploadTicket};
    use crate::metadata::MockEpisodeResolver;
    use mockall::Sequence;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const SHEET: &str = "title;description\nIntro;desc1\nPart2;desc2\n";

    struct Dirs {
        root: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            std::fs::create_dir(root.path().join("incoming")).unwrap();
            std::fs::create_dir(root.path().join("done")).unwrap();
            std::fs::write(root.path().join("episodes.csv"), SHEET).unwrap();
            Dirs { root }
        }

        fn incoming(&self, name: &str) -> PathBuf {
            self.root.path().join("incoming").join(name)
        }

        fn done(&self, name: &str) -> PathBuf {
            self.root.path().join("done").join(name)
        }

        fn drop_file(&self, name: &str) -> PathBuf {
            let path = self.incoming(name);
            std::fs::write(&path, b"audio").unwrap();
            path
        }

        fn pipeline(&self, host: MockPodcastHost) -> Pipeline {
            let host: Arc<dyn PodcastHost> = Arc::new(host);
            Pipeline::new(
                FileSink::new(self.root.path().join("incoming"), self.root.path().join("done")),
                Arc::new(TokenManager::new(host.clone())),
                Arc::new(CsvEpisodeResolver::new(self.root.path().join("episodes.csv"))),
                UploadOrchestrator::new(host, EpisodeStatus::Publish, Duration::ZERO),
            )
        }
    }

    fn grant(n: usize) -> TokenGrant {
        TokenGrant {
            access_token: format!("tok-{n}"),
            expires_in: 3600,
        }
    }

    fn ticket(key: &str) -> UploadTicket {
        UploadTicket {
            presigned_url: format!("https://s3.example/{key}"),
            expire_in: Some(600),
            file_key: key.into(),
        }
    }

    fn episode(id: &str) -> PublishedEpisode {
        PublishedEpisode {
            id: id.into(),
            permalink_url: format!("https://show.podbean.com/e/{id}/"),
            status: EpisodeStatus::Publish,
        }
    }

    #[tokio::test]
    async fn successful_run_publishes_then_archives() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("1.mp3");
        let source = path.clone();
        let mut seq = Sequence::new();
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(grant(1)));
        host.expect_authorize_upload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(ticket("key-1")));
        host.expect_transfer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        host.expect_create_episode()
            .withf(|_, ep| ep.title == "Intro" && ep.content == "desc1" && ep.media_key == "key-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| {
                assert!(source.exists(), "file must not be archived before publish");
                Ok(episode("EP1"))
            });

        let outcome = dirs.pipeline(host).handle(&path).await;

        match outcome {
            RunOutcome::Published { episode, archived } => {
                assert_eq!(episode.id, "EP1");
                assert!(archived);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!path.exists());
        assert!(dirs.done("1.mp3").exists());
    }

    #[tokio::test]
    async fn non_matching_names_make_no_remote_calls() {
        let dirs = Dirs::new();
        // Any call on a mock without expectations panics
        let pipeline = dirs.pipeline(MockPodcastHost::new());

        for name in ["notes.txt", ".1.mp3", "1.wav"] {
            let path = dirs.drop_file(name);
            let outcome = pipeline.handle(&path).await;
            assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::NotAudio)), "{name}");
            assert!(path.exists());
        }

        let path = dirs.drop_file("intro.mp3");
        let outcome = pipeline.handle(&path).await;
        assert!(matches!(
            outcome,
            RunOutcome::Abandoned {
                reached: Stage::Detected,
                error: UploadError::InvalidName { .. }
            }
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn archived_file_is_not_uploaded_again() {
        let dirs = Dirs::new();
        std::fs::write(dirs.done("2.mp3"), b"old").unwrap();
        let path = dirs.drop_file("2.mp3");
        let pipeline = dirs.pipeline(MockPodcastHost::new());

        let outcome = pipeline.handle(&path).await;

        assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::AlreadyArchived)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_sheet_row_abandons_before_upload() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("3.mp3");
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| Ok(grant(1)));
        host.expect_authorize_upload().never();
        host.expect_transfer().never();
        host.expect_create_episode().never();

        let outcome = dirs.pipeline(host).handle(&path).await;

        assert!(matches!(
            outcome,
            RunOutcome::Abandoned {
                reached: Stage::TokenReady,
                error: UploadError::NotFound { index: 3, .. }
            }
        ));
        assert!(path.exists());
        assert!(!dirs.done("3.mp3").exists());
    }

    #[tokio::test]
    async fn token_failure_leaves_file_in_place() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("1.mp3");
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| {
            Err(UploadError::Auth {
                code: "invalid_client".into(),
                description: "bad secret".into(),
            })
        });
        host.expect_authorize_upload().never();

        let outcome = dirs.pipeline(host).handle(&path).await;

        assert!(matches!(
            outcome,
            RunOutcome::Abandoned {
                reached: Stage::NotAlreadyArchived,
                error: UploadError::Auth { .. }
            }
        ));
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_refreshed_before_next_run_uploads() {
        let dirs = Dirs::new();
        let first = dirs.drop_file("1.mp3");
        let second = dirs.drop_file("2.mp3");
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut seq = Sequence::new();
        let mut host = MockPodcastHost::new();
        for n in 1..=2 {
            let counter = fetches.clone();
            host.expect_fetch_token()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || Ok(grant(counter.fetch_add(1, Ordering::SeqCst) + 1)));
            let token = format!("tok-{n}");
            host.expect_authorize_upload()
                .withf(move |t, _, _| t == token)
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _, _| Ok(ticket(&format!("key-{n}"))));
            host.expect_transfer()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
            host.expect_create_episode()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(episode(&format!("EP{n}"))));
        }
        let pipeline = dirs.pipeline(host);

        assert!(matches!(pipeline.handle(&first).await, RunOutcome::Published { .. }));
        tokio::time::advance(Duration::from_secs(3700)).await;
        assert!(matches!(pipeline.handle(&second).await, RunOutcome::Published { .. }));

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn archive_failure_is_reported_but_publish_stands() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("1.mp3");
        std::fs::remove_dir(dirs.root.path().join("done")).unwrap();
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| Ok(grant(1)));
        host.expect_authorize_upload()
            .times(1)
            .returning(|_, _, _| Ok(ticket("key-1")));
        host.expect_transfer().times(1).returning(|_, _| Ok(()));
        host.expect_create_episode()
            .times(1)
            .returning(|_, _| Ok(episode("EP1")));

        let outcome = dirs.pipeline(host).handle(&path).await;

        assert!(matches!(
            outcome,
            RunOutcome::Published {
                archived: false,
                ..
            }
        ));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn metadata_comes_from_the_resolver_for_the_file_index() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("2.mp3");
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| Ok(grant(1)));
        host.expect_authorize_upload().never();
        let mut resolver = MockEpisodeResolver::new();
        resolver
            .expect_resolve()
            .withf(|index| *index == 2)
            .times(1)
            .returning(|index| Err(UploadError::IncompleteMetadata { index }));
        let host: Arc<dyn PodcastHost> = Arc::new(host);
        let pipeline = Pipeline::new(
            FileSink::new(dirs.root.path().join("incoming"), dirs.root.path().join("done")),
            Arc::new(TokenManager::new(host.clone())),
            Arc::new(resolver),
            UploadOrchestrator::new(host, EpisodeStatus::Publish, Duration::ZERO),
        );

        let outcome = pipeline.handle(&path).await;

        assert!(matches!(
            outcome,
            RunOutcome::Abandoned {
                error: UploadError::IncompleteMetadata { index: 2 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failing_file_does_not_affect_concurrent_run() {
        let dirs = Dirs::new();
        let bad = dirs.drop_file("1.mp3");
        let good = dirs.drop_file("2.mp3");
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| Ok(grant(1)));
        host.expect_authorize_upload()
            .withf(|_, name, _| name == "1.mp3")
            .times(1)
            .returning(|_, _, _| {
                Err(UploadError::Remote(crate::error::RemoteError {
                    step: crate::error::RemoteStep::Authorize,
                    status: 400,
                    code: "input_params_invalid".into(),
                    description: "bad file".into(),
                }))
            });
        host.expect_authorize_upload()
            .withf(|_, name, _| name == "2.mp3")
            .times(1)
            .returning(|_, _, _| Ok(ticket("key-2")));
        host.expect_transfer().times(1).returning(|_, _| Ok(()));
        host.expect_create_episode()
            .withf(|_, ep| ep.title == "Part2" && ep.media_key == "key-2")
            .times(1)
            .returning(|_, _| Ok(episode("EP2")));
        let pipeline = dirs.pipeline(host);

        let (failed, published) = tokio::join!(pipeline.handle(&bad), pipeline.handle(&good));

        assert!(matches!(
            failed,
            RunOutcome::Abandoned {
                reached: Stage::MetadataResolved,
                error: UploadError::Remote(_)
            }
        ));
        assert!(matches!(
            published,
            RunOutcome::Published { archived: true, .. }
        ));
        assert!(bad.exists());
        assert!(dirs.done("2.mp3").exists());
    }

    #[tokio::test]
    async fn duplicate_event_for_running_file_uploads_once() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("1.mp3");
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().times(1).returning(|| Ok(grant(1)));
        host.expect_authorize_upload()
            .times(1)
            .returning(|_, _, _| Ok(ticket("key-1")));
        host.expect_transfer().times(1).returning(|_, _| Ok(()));
        host.expect_create_episode()
            .times(1)
            .returning(|_, _| Ok(episode("EP1")));
        let pipeline = dirs.pipeline(host);

        let (first, second) = tokio::join!(pipeline.handle(&path), pipeline.handle(&path));

        assert!(matches!(first, RunOutcome::Published { .. }));
        assert!(matches!(second, RunOutcome::Skipped(SkipReason::InFlight)));
        assert!(dirs.done("1.mp3").exists());
    }

    #[tokio::test]
    async fn unreadable_archive_folder_abandons_before_upload() {
        let dirs = Dirs::new();
        let path = dirs.drop_file("1.mp3");
        std::fs::remove_dir(dirs.root.path().join("done")).unwrap();
        std::fs::write(dirs.root.path().join("done"), b"").unwrap();
        let mut host = MockPodcastHost::new();
        host.expect_fetch_token().never();
        host.expect_authorize_upload().never();

        let outcome = dirs.pipeline(host).handle(&path).await;

        assert!(matches!(
            outcome,
            RunOutcome::Abandoned {
                reached: Stage::NameValid,
                error: UploadError::Io { .. }
            }
        ));
        assert!(path.exists());
    }

    #[test]
    fn file_name_can_only_be_claimed_once_at_a_time() {
        let dirs = Dirs::new();
        let pipeline = dirs.pipeline(MockPodcastHost::new());

        let guard = pipeline.claim("1.mp3").expect("first claim");
        assert!(pipeline.claim("1.mp3").is_none());
        assert!(pipeline.claim("2.mp3").is_some());
        drop(guard);
        assert!(pipeline.claim("1.mp3").is_some());
    }
}
