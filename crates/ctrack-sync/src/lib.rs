//! Refresh pipeline: concurrent adapter fan-out, merge, persist, schedule.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ctrack_adapters::{
    AdapterContext, CodeChefAdapter, CodeforcesAdapter, LeetCodeAdapter, SolutionsClient,
    SourceAdapter,
};
use ctrack_core::{Contest, Platform};
use ctrack_store::{sort_batch, CatalogError, CatalogStore, HttpClientConfig, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ctrack-sync";

/// Externally supplied knobs, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub refresh_interval_seconds: u64,
    pub adapter_timeout_seconds: u64,
    pub user_agent: String,
    pub sources_file: Option<PathBuf>,
    pub youtube_api_key: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            refresh_interval_seconds: std::env::var("REFRESH_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6 * 3600),
            adapter_timeout_seconds: std::env::var("ADAPTER_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("CTRACK_USER_AGENT")
                .unwrap_or_else(|_| "ctrack-bot/0.1".to_string()),
            sources_file: std::env::var("SOURCES_FILE").ok().map(PathBuf::from),
            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub platform: Platform,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub solutions_playlist: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceRegistry {
    /// Every known platform at its default endpoint.
    pub fn default_all() -> Self {
        Self {
            sources: Platform::ALL
                .into_iter()
                .map(|platform| SourceConfig {
                    platform,
                    enabled: true,
                    endpoint_url: None,
                    solutions_playlist: None,
                })
                .collect(),
        }
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry yaml")
    }

    pub fn build_adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|source| source.enabled)
            .map(|source| adapter_for(source))
            .collect()
    }
}

fn adapter_for(source: &SourceConfig) -> Arc<dyn SourceAdapter> {
    match (source.platform, source.endpoint_url.as_deref()) {
        (Platform::Codeforces, Some(url)) => Arc::new(CodeforcesAdapter::with_endpoint(url)),
        (Platform::Codeforces, None) => Arc::new(CodeforcesAdapter::default()),
        (Platform::LeetCode, Some(url)) => Arc::new(LeetCodeAdapter::with_endpoint(url)),
        (Platform::LeetCode, None) => Arc::new(LeetCodeAdapter::default()),
        (Platform::CodeChef, Some(url)) => Arc::new(CodeChefAdapter::with_endpoint(url)),
        (Platform::CodeChef, None) => Arc::new(CodeChefAdapter::default()),
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("all {attempted} adapters failed this cycle")]
    AggregationFailed { attempted: usize },
    #[error("catalog write failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

/// Outcome of one refresh cycle. A summary with a non-empty `failures` list
/// is a partial success: the healthy platforms were persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub contests: Vec<Contest>,
    pub platform_counts: BTreeMap<Platform, usize>,
    pub duplicates_dropped: usize,
    pub rejected_records: usize,
    pub failures: Vec<(Platform, String)>,
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    catalog: Arc<CatalogStore>,
    adapter_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        http: Arc<HttpFetcher>,
        catalog: Arc<CatalogStore>,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            http,
            catalog,
            adapter_timeout,
        }
    }

    /// One full fetch → normalize → merge → persist cycle.
    ///
    /// Every adapter runs concurrently under its own deadline; a slow or
    /// failing adapter never blocks the others, and its platform's prior
    /// catalog entries stay queryable unchanged.
    pub async fn run_once(&self) -> Result<RefreshSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, adapters = self.adapters.len(), "refresh cycle started");

        let mut set = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = adapter.clone();
            let http = self.http.clone();
            let timeout = self.adapter_timeout;
            set.spawn(async move {
                let platform = adapter.platform();
                let ctx = AdapterContext::new(run_id);
                let outcome = match tokio::time::timeout(timeout, adapter.fetch(&http, &ctx)).await
                {
                    Ok(Ok(raws)) => Ok(raws),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
                };
                (platform, outcome)
            });
        }

        let mut merged: HashMap<Uuid, Contest> = HashMap::new();
        let mut succeeded: BTreeSet<Platform> = BTreeSet::new();
        let mut failures: Vec<(Platform, String)> = Vec::new();
        let mut duplicates_dropped = 0usize;
        let mut rejected_records = 0usize;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((platform, Ok(raws))) => {
                    succeeded.insert(platform);
                    for raw in raws {
                        match raw.into_contest(platform) {
                            Ok(contest) => {
                                if merged.insert(contest.identity, contest).is_some() {
                                    // Same identity twice in one run means the
                                    // adapter emitted duplicate rows.
                                    duplicates_dropped += 1;
                                    warn!(platform = platform.as_str(), "duplicate identity in batch");
                                }
                            }
                            Err(err) => {
                                rejected_records += 1;
                                warn!(platform = platform.as_str(), %err, "rejected record");
                            }
                        }
                    }
                }
                Ok((platform, Err(message))) => {
                    warn!(platform = platform.as_str(), %message, "adapter failed this cycle");
                    failures.push((platform, message));
                }
                Err(join_err) => {
                    warn!(%join_err, "adapter task aborted");
                }
            }
        }

        if succeeded.is_empty() {
            warn!(%run_id, "refresh cycle aborted: no adapter succeeded");
            return Err(SyncError::AggregationFailed {
                attempted: self.adapters.len(),
            });
        }

        let mut by_platform: BTreeMap<Platform, Vec<Contest>> = BTreeMap::new();
        for contest in merged.into_values() {
            by_platform.entry(contest.platform).or_default().push(contest);
        }

        let mut contests = Vec::new();
        let mut platform_counts = BTreeMap::new();
        for platform in &succeeded {
            // An empty batch from a healthy adapter still supersedes the
            // platform's prior entries.
            let batch = by_platform.remove(platform).unwrap_or_default();
            platform_counts.insert(*platform, batch.len());
            contests.extend(batch.iter().cloned());
            self.catalog.replace(*platform, batch).await?;
        }
        sort_batch(&mut contests);

        let finished_at = Utc::now();
        info!(
            %run_id,
            contests = contests.len(),
            failed = failures.len(),
            "refresh cycle finished"
        );
        Ok(RefreshSummary {
            run_id,
            started_at,
            finished_at,
            contests,
            platform_counts,
            duplicates_dropped,
            rejected_records,
            failures,
        })
    }
}

/// Build the aggregator from config: registry (file or default), adapters,
/// shared HTTP client.
pub fn build_aggregator(config: &SyncConfig, catalog: Arc<CatalogStore>) -> Result<Aggregator> {
    let registry = match &config.sources_file {
        Some(path) => SourceRegistry::load(path)?,
        None => SourceRegistry::default_all(),
    };
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: config.adapter_timeout(),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })
    .context("building http client")?;
    Ok(Aggregator::new(
        registry.build_adapters(),
        Arc::new(http),
        catalog,
        config.adapter_timeout(),
    ))
}

/// Clears the in-flight flag even when the owning future is dropped mid-run
/// (scheduler shutdown cancels the job future without polling it to the end).
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Solution-video lookup client, or `None` when no API key is configured.
/// Registry playlist overrides are applied on top of the curated defaults.
pub fn build_solutions(config: &SyncConfig) -> Result<Option<SolutionsClient>> {
    let Some(api_key) = &config.youtube_api_key else {
        return Ok(None);
    };
    let registry = match &config.sources_file {
        Some(path) => SourceRegistry::load(path)?,
        None => SourceRegistry::default_all(),
    };
    let mut client = SolutionsClient::new(api_key.clone());
    for source in &registry.sources {
        if let Some(playlist) = &source.solutions_playlist {
            client.set_playlist(source.platform, playlist.clone());
        }
    }
    Ok(Some(client))
}

/// Run one cycle unless another is already in flight; a busy tick is skipped,
/// not queued. The next tick catches up.
pub async fn run_guarded(
    aggregator: &Aggregator,
    in_flight: &AtomicBool,
) -> Option<Result<RefreshSummary, SyncError>> {
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("refresh already in flight; skipping this tick");
        return None;
    }
    let _clear = InFlightGuard(in_flight);
    Some(aggregator.run_once().await)
}

pub struct RefreshScheduler {
    aggregator: Arc<Aggregator>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    /// Run once at startup, then on the fixed period. A failed cycle is
    /// logged and left to self-heal on the following tick.
    pub async fn start(&self) -> Result<JobScheduler, SyncError> {
        let in_flight = Arc::new(AtomicBool::new(false));

        if let Some(Err(err)) = run_guarded(&self.aggregator, &in_flight).await {
            warn!(%err, "startup refresh failed; next tick will retry");
        }

        let sched = JobScheduler::new().await?;
        let aggregator = self.aggregator.clone();
        let job = Job::new_repeated_async(self.interval, move |_uuid, _lock| {
            let aggregator = aggregator.clone();
            let in_flight = in_flight.clone();
            Box::pin(async move {
                if let Some(Err(err)) = run_guarded(&aggregator, &in_flight).await {
                    warn!(%err, "scheduled refresh failed; next tick will retry");
                }
            })
        })?;
        sched.add(job).await?;
        sched.start().await?;
        Ok(sched)
    }
}
