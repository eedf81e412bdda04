// API client module: the Podbean HTTP calls used by an upload run.
//
// `PodcastHost` is the seam the rest of the crate talks to; `PodbeanClient`
// is the reqwest implementation. Every response is decoded into an explicit
// `Result`: a success body, or the service's `{error, error_description}`
// body turned into an `UploadError`.

use crate::config::Config;
use crate::error::{RemoteError, RemoteStep, UploadError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Content type sent for every audio upload.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Fields of the token endpoint response we care about.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds, counted from when the grant was received.
    pub expires_in: u64,
}

/// Response of the upload-authorize call. The file key is what the publish
/// step references; the presigned URL is only used for the transfer.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub presigned_url: String,
    #[serde(default, alias = "expire_at")]
    pub expire_in: Option<u64>,
    pub file_key: String,
}

/// Whether a new episode goes live immediately or stays a draft.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    #[default]
    Publish,
    Draft,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Publish => "publish",
            EpisodeStatus::Draft => "draft",
        }
    }
}

/// Everything the episode-create call needs besides the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpisode {
    pub title: String,
    pub content: String,
    pub status: EpisodeStatus,
    pub media_key: String,
    /// Unix seconds.
    pub publish_timestamp: i64,
}

/// The episode record returned by the service. Only the fields used for
/// reporting are kept.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishedEpisode {
    pub id: String,
    pub permalink_url: String,
    pub status: EpisodeStatus,
}

#[derive(Deserialize)]
struct EpisodeEnvelope {
    episode: PublishedEpisode,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// A decoded non-success response, before it is tied to a protocol step.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiFailure {
    status: u16,
    code: String,
    description: String,
}

impl ApiFailure {
    fn from_body(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => ApiFailure {
                status: status.as_u16(),
                code: parsed.error,
                description: parsed.error_description,
            },
            // Not the service's error shape (the object store answers in XML)
            Err(_) => ApiFailure {
                status: status.as_u16(),
                code: status.as_u16().to_string(),
                description: body.trim().to_string(),
            },
        }
    }

    fn into_remote(self, step: RemoteStep) -> UploadError {
        UploadError::Remote(RemoteError {
            step,
            status: self.status,
            code: self.code,
            description: self.description,
        })
    }

    fn into_auth(self) -> UploadError {
        UploadError::Auth {
            code: self.code,
            description: self.description,
        }
    }
}

/// Read a response into either the decoded success body or an `ApiFailure`.
async fn read_reply<T: DeserializeOwned>(
    res: Response,
    what: &'static str,
) -> Result<Result<T, ApiFailure>, UploadError> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        return Ok(Err(ApiFailure::from_body(status, &body)));
    }
    serde_json::from_str(&body)
        .map(Ok)
        .map_err(|source| UploadError::Decode { what, source })
}

/// The remote podcast host as seen by the upload pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodcastHost: Send + Sync {
    /// Exchange the client credentials for a fresh access token.
    async fn fetch_token(&self) -> Result<TokenGrant, UploadError>;

    /// Ask for a presigned upload target for a file of `file_size` bytes.
    async fn authorize_upload(
        &self,
        access_token: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<UploadTicket, UploadError>;

    /// PUT the raw file bytes to the ticket's presigned URL.
    async fn transfer(&self, ticket: &UploadTicket, bytes: Vec<u8>) -> Result<(), UploadError>;

    /// Create an episode referencing previously uploaded media.
    async fn create_episode(
        &self,
        access_token: &str,
        episode: &NewEpisode,
    ) -> Result<PublishedEpisode, UploadError>;
}

/// reqwest client for the Podbean API. Holds the client credentials; the
/// access token itself is owned by `TokenManager` and passed per call.
#[derive(Clone)]
pub struct PodbeanClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl PodbeanClient {
    pub fn new(base_url: &str, client_id: &str, client_secret: &str) -> Result<Self, UploadError> {
        let client = Client::builder().build()?;
        Ok(PodbeanClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, UploadError> {
        Self::new(&config.api_base, &config.client_id, &config.client_secret)
    }

    /// Basic auth header carrying the client credentials.
    fn credential_headers(&self) -> Result<HeaderMap, UploadError> {
        let encoded = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let value = HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|e| {
            UploadError::Auth {
                code: "invalid_client".into(),
                description: e.to_string(),
            }
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

#[async_trait]
impl PodcastHost for PodbeanClient {
    async fn fetch_token(&self) -> Result<TokenGrant, UploadError> {
        let url = format!("{}/oauth/token", self.base_url);
        let res = self
            .client
            .post(&url)
            .headers(self.credential_headers()?)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| UploadError::Auth {
                code: "request_failed".into(),
                description: e.to_string(),
            })?;
        read_reply(res, "token").await?.map_err(ApiFailure::into_auth)
    }

    async fn authorize_upload(
        &self,
        access_token: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<UploadTicket, UploadError> {
        let url = format!("{}/files/uploadAuthorize", self.base_url);
        let file_size = file_size.to_string();
        let res = self
            .client
            .get(&url)
            .query(&[
                ("access_token", access_token),
                ("filename", file_name),
                ("filesize", file_size.as_str()),
                ("content_type", AUDIO_CONTENT_TYPE),
            ])
            .send()
            .await?;
        read_reply(res, "upload authorize")
            .await?
            .map_err(|f| f.into_remote(RemoteStep::Authorize))
    }

    async fn transfer(&self, ticket: &UploadTicket, bytes: Vec<u8>) -> Result<(), UploadError> {
        let res = self
            .client
            .put(&ticket.presigned_url)
            .header(CONTENT_TYPE, AUDIO_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await?;
        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        // Report what the transfer target said, not the authorize response.
        let body = res.text().await.unwrap_or_default();
        Err(ApiFailure::from_body(status, &body).into_remote(RemoteStep::Transfer))
    }

    async fn create_episode(
        &self,
        access_token: &str,
        episode: &NewEpisode,
    ) -> Result<PublishedEpisode, UploadError> {
        let url = format!("{}/episodes", self.base_url);
        let publish_timestamp = episode.publish_timestamp.to_string();
        let res = self
            .client
            .post(&url)
            .form(&[
                ("access_token", access_token),
                ("title", episode.title.as_str()),
                ("content", episode.content.as_str()),
                ("status", episode.status.as_str()),
                ("type", "public"),
                ("media_key", episode.media_key.as_str()),
                ("apple_episode_type", "full"),
                ("publish_timestamp", publish_timestamp.as_str()),
                ("content_explicit", "clean"),
            ])
            .send()
            .await?;
        read_reply::<EpisodeEnvelope>(res, "episode create")
            .await?
            .map(|envelope| envelope.episode)
            .map_err(|f| f.into_remote(RemoteStep::Publish))
    }
}
