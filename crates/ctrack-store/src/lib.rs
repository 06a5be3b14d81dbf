//! Catalog + bookmark stores and the shared HTTP fetch utility.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ctrack_core::{Bookmark, Contest, ContestSnapshot, Platform};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ctrack-store";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("replace for {expected} contained a {found} contest")]
    PlatformMismatch { expected: Platform, found: Platform },
}

/// Query shape for the catalog: optional platform set and start-time window.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub platforms: Option<Vec<Platform>>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CatalogFilter {
    fn matches(&self, contest: &Contest) -> bool {
        if let Some(platforms) = &self.platforms {
            if !platforms.contains(&contest.platform) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if contest.start_time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if contest.start_time > to {
                return false;
            }
        }
        true
    }
}

/// Current-batch contest catalog, one slice per platform identity namespace.
///
/// `replace` swaps a platform's whole slice under the write lock, so a
/// concurrent reader observes the old slice or the new one, never a mix of
/// the two. Other platforms' slices are untouched by a replace.
#[derive(Debug, Default)]
pub struct CatalogStore {
    slices: RwLock<HashMap<Platform, Arc<Vec<Contest>>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(
        &self,
        platform: Platform,
        mut contests: Vec<Contest>,
    ) -> Result<(), CatalogError> {
        if let Some(stray) = contests.iter().find(|c| c.platform != platform) {
            return Err(CatalogError::PlatformMismatch {
                expected: platform,
                found: stray.platform,
            });
        }
        sort_batch(&mut contests);
        let mut slices = self.slices.write().await;
        slices.insert(platform, Arc::new(contests));
        Ok(())
    }

    pub async fn query(&self, filter: &CatalogFilter) -> Vec<Contest> {
        let slices = self.slices.read().await;
        let mut out: Vec<Contest> = slices
            .values()
            .flat_map(|slice| slice.iter())
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        drop(slices);
        sort_batch(&mut out);
        out
    }

    pub async fn get_by_identity(&self, identity: Uuid) -> Option<Contest> {
        let slices = self.slices.read().await;
        slices
            .values()
            .flat_map(|slice| slice.iter())
            .find(|c| c.identity == identity)
            .cloned()
    }
}

/// Ascending start time, identity tie-break for determinism.
pub fn sort_batch(contests: &mut [Contest]) {
    contests.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.identity.cmp(&b.identity))
    });
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookmarkError {
    #[error("contest {0} already bookmarked")]
    AlreadyBookmarked(Uuid),
    #[error("no bookmark for contest {0}")]
    BookmarkNotFound(Uuid),
    #[error("contest {0} not in catalog and no snapshot supplied")]
    ContestNotFound(Uuid),
}

/// Owner of the user ↔ contest bookmark relation.
///
/// Uniqueness per `(user_id, contest_identity)` is enforced inside the write
/// lock: the check and the insert happen under one guard, so two concurrent
/// identical adds can never both succeed.
#[derive(Debug, Default)]
pub struct BookmarkStore {
    entries: RwLock<HashMap<(String, Uuid), Bookmark>>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots from the catalog when the contest is present; otherwise the
    /// caller-supplied snapshot covers contests the catalog has since rotated
    /// out (documented leniency, not a consistency hole).
    pub async fn add(
        &self,
        catalog: &CatalogStore,
        user_id: &str,
        contest_identity: Uuid,
        fallback: Option<ContestSnapshot>,
    ) -> Result<Bookmark, BookmarkError> {
        let snapshot = match catalog.get_by_identity(contest_identity).await {
            Some(contest) => contest.snapshot(),
            None => fallback.ok_or(BookmarkError::ContestNotFound(contest_identity))?,
        };

        let mut entries = self.entries.write().await;
        let key = (user_id.to_string(), contest_identity);
        if entries.contains_key(&key) {
            return Err(BookmarkError::AlreadyBookmarked(contest_identity));
        }
        let bookmark = Bookmark {
            user_id: user_id.to_string(),
            contest_identity,
            title: snapshot.title,
            platform: snapshot.platform,
            start_time: snapshot.start_time,
            url: snapshot.url,
            created_at: Utc::now(),
        };
        entries.insert(key, bookmark.clone());
        Ok(bookmark)
    }

    pub async fn remove(
        &self,
        user_id: &str,
        contest_identity: Uuid,
    ) -> Result<(), BookmarkError> {
        let mut entries = self.entries.write().await;
        entries
            .remove(&(user_id.to_string(), contest_identity))
            .map(|_| ())
            .ok_or(BookmarkError::BookmarkNotFound(contest_identity))
    }

    /// Newest bookmark first, identity tie-break.
    pub async fn list(&self, user_id: &str) -> Vec<Bookmark> {
        let entries = self.entries.read().await;
        let mut out: Vec<Bookmark> = entries
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        drop(entries);
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.contest_identity.cmp(&b.contest_identity))
        });
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("building http client: {0}")]
    Client(reqwest::Error),
}

/// Thin GET client with retry classification and capped exponential backoff.
/// Per-adapter deadlines are enforced by the caller, not here.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        platform: Platform,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, platform = platform.as_str(), url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop captures a request error"),
        ))
    }
}
