// Access token lifecycle.
//
// `TokenManager` is the only owner of the current token. Runs ask it for a
// valid token and get a copy; they never hold on to shared state.

use crate::api::{PodcastHost, TokenGrant};
use crate::error::UploadError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long one credential exchange may take before it is given up.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// An access token together with when it was issued and how long the
/// service said it would last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub expires_in: Duration,
    pub issued_at: Instant,
}

impl Token {
    pub fn from_grant(grant: TokenGrant, issued_at: Instant) -> Self {
        Token {
            access_token: grant.access_token,
            expires_in: Duration::from_secs(grant.expires_in),
            issued_at,
        }
    }

    /// Valid while less than `expires_in` has elapsed since issue.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) < self.expires_in
    }
}

pub struct TokenManager {
    host: Arc<dyn PodcastHost>,
    current: RwLock<Option<Token>>,
    // Held across the exchange so concurrent runs share one refresh
    refresh_lock: Mutex<()>,
    exchange_timeout: Duration,
}

impl TokenManager {
    pub fn new(host: Arc<dyn PodcastHost>) -> Self {
        TokenManager {
            host,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            exchange_timeout: EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Return a token that is valid right now, exchanging credentials for a
    /// new one if none is held or the held one has expired.
    pub async fn acquire(&self) -> Result<Token, UploadError> {
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another run may have refreshed while we waited for the lock
        if let Some(token) = self.valid_token().await {
            debug!("token refreshed by a concurrent run");
            return Ok(token);
        }

        info!("requesting new access token");
        // The lock is held here, so a hung exchange must not outlive the timeout
        let grant = tokio::time::timeout(self.exchange_timeout, self.host.fetch_token())
            .await
            .map_err(|_| UploadError::Auth {
                code: "timeout".into(),
                description: format!(
                    "no answer from the token endpoint within {}s",
                    self.exchange_timeout.as_secs()
                ),
            })??;
        let token = Token::from_grant(grant, Instant::now());
        *self.current.write().await = Some(token.clone());
        info!(expires_in = token.expires_in.as_secs(), "access token acquired");
        Ok(token)
    }

    /// Force the next `acquire` to refresh. Only the token that was rejected
    /// is dropped; if it has already been replaced the newer one is kept.
    pub async fn mark_invalid(&self, rejected: &Token) {
        let mut current = self.current.write().await;
        if current
            .as_ref()
            .is_some_and(|held| held.access_token == rejected.access_token)
        {
            warn!("access token rejected by the service, forcing refresh");
            *current = None;
        }
    }

    async fn valid_token(&self) -> Option<Token> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_valid_at(Instant::now()))
            .cloned()
    }
}

/// The token a single run is using, plus its one allowed refresh after the
/// service rejects it.
pub struct RunToken<'a> {
    tokens: &'a TokenManager,
    current: Token,
    retry_left: bool,
}

impl<'a> RunToken<'a> {
    pub fn new(tokens: &'a TokenManager, current: Token) -> Self {
        RunToken {
            tokens,
            current,
            retry_left: true,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.current.access_token
    }

    /// Handle a failed remote call. If the service rejected the token and the
    /// run has not refreshed yet, swap in a fresh token so the caller can
    /// repeat the call once; otherwise hand the error back.
    pub async fn recover(&mut self, err: UploadError) -> Result<(), UploadError> {
        let rejected = err.as_remote().is_some_and(|e| e.is_token_rejected());
        if !rejected || !self.retry_left {
            return Err(err);
        }
        self.retry_left = false;
        self.tokens.mark_invalid(&self.current).await;
        self.current = self.tokens.acquire().await?;
        Ok(())
    }
}
