// The three-call upload protocol for one file: authorize, transfer, publish,
// with a fixed settle delay between transfer and publish.
//
// No step is retried, except that a call whose token was rejected may be
// repeated once with a fresh token (see `RunToken`). Nothing is rolled back
// on failure; an unused ticket on the service side is harmless.

use crate::api::{EpisodeStatus, NewEpisode, PodcastHost, PublishedEpisode};
use crate::error::UploadError;
use crate::metadata::EpisodeMetadata;
use crate::pipeline::Stage;
use crate::sink::PendingFile;
use crate::token::RunToken;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct UploadOrchestrator {
    host: Arc<dyn PodcastHost>,
    status: EpisodeStatus,
    settle_delay: Duration,
}

impl UploadOrchestrator {
    pub fn new(host: Arc<dyn PodcastHost>, status: EpisodeStatus, settle_delay: Duration) -> Self {
        UploadOrchestrator {
            host,
            status,
            settle_delay,
        }
    }

    /// Upload `file` and create its episode. `stage` is advanced after each
    /// step that completes, so on error it names the last step that worked.
    pub async fn publish(
        &self,
        token: &mut RunToken<'_>,
        file: &PendingFile,
        metadata: &EpisodeMetadata,
        stage: &mut Stage,
    ) -> Result<PublishedEpisode, UploadError> {
        // One read: the size announced to authorize is the size transferred
        let bytes = tokio::fs::read(&file.source_path)
            .await
            .map_err(|source| UploadError::Io {
                path: file.source_path.clone(),
                source,
            })?;
        let file_size = bytes.len() as u64;

        let ticket = match self
            .host
            .authorize_upload(token.access_token(), &file.file_name, file_size)
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                token.recover(err).await?;
                self.host
                    .authorize_upload(token.access_token(), &file.file_name, file_size)
                    .await?
            }
        };
        *stage = Stage::Authorized;
        info!(file_key = %ticket.file_key, "upload authorized");

        self.host.transfer(&ticket, bytes).await?;
        *stage = Stage::Transferred;
        info!(bytes = file_size, "file transferred");

        info!(
            seconds = self.settle_delay.as_secs(),
            "waiting for the service to process the audio"
        );
        tokio::time::sleep(self.settle_delay).await;
        *stage = Stage::Settled;

        let episode = NewEpisode {
            title: metadata.title.clone(),
            content: metadata.description.clone(),
            status: self.status,
            media_key: ticket.file_key,
            publish_timestamp: chrono::Utc::now().timestamp(),
        };
        let published = match self
            .host
            .create_episode(token.access_token(), &episode)
            .await
        {
            Ok(published) => published,
            Err(err) => {
                token.recover(err).await?;
                self.host
                    .create_episode(token.access_token(), &episode)
                    .await?
            }
        };
        *stage = Stage::Published;
        info!(
            id = %published.id,
            url = %published.permalink_url,
            status = published.status.as_str(),
            "episode created"
        );
        Ok(published)
    }
}
