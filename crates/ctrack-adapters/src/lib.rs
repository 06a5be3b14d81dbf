//! Source adapter contract + one adapter per upstream platform.
//!
//! Adapters only reach their endpoint and normalize the source-specific JSON
//! shape into [`RawContest`] records. A malformed individual record is dropped
//! and logged; the whole call fails only on transport errors or an unexpected
//! top-level schema. No adapter writes to any store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ctrack_core::{Platform, RawContest};
use ctrack_store::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ctrack-adapters";

pub const CODEFORCES_ENDPOINT: &str = "https://codeforces.com/api/contest.list";
pub const LEETCODE_ENDPOINT: &str = "https://leetcode.com/contest/api/list/";
pub const CODECHEF_ENDPOINT: &str =
    "https://www.codechef.com/api/list/contests/all?sort_by=START&sorting_order=asc&offset=0&mode=all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

/// Total unavailability of one source for this cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(#[from] FetchError),
    #[error("unexpected upstream schema: {0}")]
    Schema(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> Platform;
    fn endpoint(&self) -> &str;

    /// Map one upstream response body into raw contest records.
    fn parse(&self, body: &[u8]) -> Result<Vec<RawContest>, SourceError>;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawContest>, SourceError> {
        let resp = http
            .fetch_bytes(ctx.run_id, self.platform(), self.endpoint())
            .await?;
        self.parse(&resp.body)
    }
}

fn epoch_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Deserialize one listing row, tolerating rows that do not fit the expected
/// shape. Returns `None` (after logging) for rows the caller should drop.
fn row_from_value<T: serde::de::DeserializeOwned>(platform: Platform, row: &JsonValue) -> Option<T> {
    match serde_json::from_value(row.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(platform = platform.as_str(), %err, "dropping malformed listing row");
            None
        }
    }
}

fn drop_row(platform: Platform, native_id: &str, reason: &str) {
    warn!(
        platform = platform.as_str(),
        native_id, reason, "dropping malformed listing row"
    );
}

/// Codeforces `contest.list` API: epoch-second start times plus a duration.
#[derive(Debug, Clone)]
pub struct CodeforcesAdapter {
    endpoint: String,
}

impl Default for CodeforcesAdapter {
    fn default() -> Self {
        Self {
            endpoint: CODEFORCES_ENDPOINT.to_string(),
        }
    }
}

impl CodeforcesAdapter {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeforcesList {
    status: String,
    #[serde(default)]
    result: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CodeforcesRow {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "startTimeSeconds")]
    start_time_seconds: Option<i64>,
    #[serde(rename = "durationSeconds")]
    duration_seconds: Option<i64>,
}

impl SourceAdapter for CodeforcesAdapter {
    fn platform(&self) -> Platform {
        Platform::Codeforces
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<RawContest>, SourceError> {
        let listing: CodeforcesList = serde_json::from_slice(body)
            .map_err(|err| SourceError::Schema(format!("codeforces listing: {err}")))?;
        if listing.status != "OK" {
            return Err(SourceError::Schema(format!(
                "codeforces status {}",
                listing.status
            )));
        }

        let mut out = Vec::with_capacity(listing.result.len());
        for row in &listing.result {
            let Some(row) = row_from_value::<CodeforcesRow>(self.platform(), row) else {
                continue;
            };
            let (Some(id), Some(name)) = (row.id, row.name) else {
                drop_row(self.platform(), "<unknown>", "missing id or name");
                continue;
            };
            let native_id = id.to_string();
            let Some(start_time) = row.start_time_seconds.and_then(epoch_utc) else {
                // Gym-style entries without a published start are not schedulable.
                drop_row(self.platform(), &native_id, "missing start time");
                continue;
            };
            out.push(RawContest {
                url: format!("https://codeforces.com/contests/{id}"),
                native_id,
                title: name,
                start_time,
                end_time: None,
                duration_secs: row.duration_seconds,
            });
        }
        Ok(out)
    }
}

/// LeetCode `contest/api/list/`: epoch-second start plus duration, slugs as ids.
#[derive(Debug, Clone)]
pub struct LeetCodeAdapter {
    endpoint: String,
}

impl Default for LeetCodeAdapter {
    fn default() -> Self {
        Self {
            endpoint: LEETCODE_ENDPOINT.to_string(),
        }
    }
}

impl LeetCodeAdapter {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LeetCodeList {
    contests: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct LeetCodeRow {
    title: Option<String>,
    title_slug: Option<String>,
    start_time: Option<i64>,
    duration: Option<i64>,
}

impl SourceAdapter for LeetCodeAdapter {
    fn platform(&self) -> Platform {
        Platform::LeetCode
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<RawContest>, SourceError> {
        let listing: LeetCodeList = serde_json::from_slice(body)
            .map_err(|err| SourceError::Schema(format!("leetcode listing: {err}")))?;

        let mut out = Vec::with_capacity(listing.contests.len());
        for row in &listing.contests {
            let Some(row) = row_from_value::<LeetCodeRow>(self.platform(), row) else {
                continue;
            };
            let (Some(title), Some(slug)) = (row.title, row.title_slug) else {
                drop_row(self.platform(), "<unknown>", "missing title or slug");
                continue;
            };
            let Some(start_time) = row.start_time.and_then(epoch_utc) else {
                drop_row(self.platform(), &slug, "missing start time");
                continue;
            };
            out.push(RawContest {
                url: format!("https://leetcode.com/contest/{slug}/"),
                native_id: slug,
                title,
                start_time,
                end_time: None,
                duration_secs: row.duration,
            });
        }
        Ok(out)
    }
}

/// CodeChef contest list API: ISO-8601 timestamps with a local offset,
/// normalized here to UTC.
#[derive(Debug, Clone)]
pub struct CodeChefAdapter {
    endpoint: String,
}

impl Default for CodeChefAdapter {
    fn default() -> Self {
        Self {
            endpoint: CODECHEF_ENDPOINT.to_string(),
        }
    }
}

impl CodeChefAdapter {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeChefList {
    status: String,
    #[serde(default)]
    future_contests: Vec<JsonValue>,
    #[serde(default)]
    present_contests: Vec<JsonValue>,
    #[serde(default)]
    past_contests: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CodeChefRow {
    contest_code: Option<String>,
    contest_name: Option<String>,
    contest_start_date_iso: Option<String>,
    contest_end_date_iso: Option<String>,
}

impl SourceAdapter for CodeChefAdapter {
    fn platform(&self) -> Platform {
        Platform::CodeChef
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<RawContest>, SourceError> {
        let listing: CodeChefList = serde_json::from_slice(body)
            .map_err(|err| SourceError::Schema(format!("codechef listing: {err}")))?;
        if listing.status != "success" {
            return Err(SourceError::Schema(format!(
                "codechef status {}",
                listing.status
            )));
        }

        let rows = listing
            .future_contests
            .iter()
            .chain(listing.present_contests.iter())
            .chain(listing.past_contests.iter());

        let mut out = Vec::new();
        for row in rows {
            let Some(row) = row_from_value::<CodeChefRow>(self.platform(), row) else {
                continue;
            };
            let (Some(code), Some(name)) = (row.contest_code, row.contest_name) else {
                drop_row(self.platform(), "<unknown>", "missing code or name");
                continue;
            };
            let Some(start_time) = row
                .contest_start_date_iso
                .as_deref()
                .and_then(parse_iso_utc)
            else {
                drop_row(self.platform(), &code, "unparsable start time");
                continue;
            };
            let end_time = row.contest_end_date_iso.as_deref().and_then(parse_iso_utc);
            out.push(RawContest {
                url: format!("https://www.codechef.com/{code}"),
                native_id: code,
                title: name,
                start_time,
                end_time,
                duration_secs: None,
            });
        }
        Ok(out)
    }
}

fn parse_iso_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub const YOUTUBE_PLAYLIST_ENDPOINT: &str =
    "https://www.googleapis.com/youtube/v3/playlistItems";

/// Curated per-platform solution playlists, same ids the upstream editorial
/// channel publishes under.
pub const DEFAULT_SOLUTION_PLAYLISTS: [(Platform, &str); 3] = [
    (Platform::Codeforces, "PLcXpkI9A-RZLUfBSNp-YQBCOezZKbDSgB"),
    (Platform::LeetCode, "PLcXpkI9A-RZI6FhydNz3JBt_-p_i25Cbr"),
    (Platform::CodeChef, "PLcXpkI9A-RZIZ6lsE0KCcLWeKNoG45fYr"),
];

/// One entry of a solution playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionVideo {
    pub video_id: String,
    pub title: String,
}

impl SolutionVideo {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// YouTube Data API v3 `playlistItems` client mapping a past contest's title
/// to its solution video.
#[derive(Debug, Clone)]
pub struct SolutionsClient {
    endpoint: String,
    api_key: String,
    playlists: BTreeMap<Platform, String>,
}

impl SolutionsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: YOUTUBE_PLAYLIST_ENDPOINT.to_string(),
            api_key: api_key.into(),
            playlists: DEFAULT_SOLUTION_PLAYLISTS
                .into_iter()
                .map(|(platform, id)| (platform, id.to_string()))
                .collect(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn set_playlist(&mut self, platform: Platform, playlist_id: impl Into<String>) {
        self.playlists.insert(platform, playlist_id.into());
    }

    pub fn playlist_for(&self, platform: Platform) -> Option<&str> {
        self.playlists.get(&platform).map(String::as_str)
    }

    fn page_url(&self, playlist_id: &str, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}?part=snippet&maxResults=50&playlistId={}&key={}",
            self.endpoint, playlist_id, self.api_key
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(token);
        }
        url
    }

    /// All videos of the platform's playlist, following `nextPageToken` until
    /// exhausted.
    pub async fn playlist_videos(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        platform: Platform,
    ) -> Result<Vec<SolutionVideo>, SourceError> {
        let Some(playlist_id) = self.playlist_for(platform) else {
            return Err(SourceError::Schema(format!(
                "no solution playlist configured for {platform}"
            )));
        };

        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.page_url(playlist_id, page_token.as_deref());
            let resp = http.fetch_bytes(run_id, platform, &url).await?;
            let (page, next) = parse_playlist_page(platform, &resp.body)?;
            videos.extend(page);
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(videos)
    }

    pub async fn find_solution(
        &self,
        http: &HttpFetcher,
        platform: Platform,
        contest_title: &str,
    ) -> Result<Option<SolutionVideo>, SourceError> {
        let videos = self
            .playlist_videos(http, Uuid::new_v4(), platform)
            .await?;
        Ok(best_video_for_title(&videos, contest_title).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<JsonValue>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: Option<String>,
    #[serde(rename = "resourceId")]
    resource_id: Option<PlaylistResource>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

fn parse_playlist_page(
    platform: Platform,
    body: &[u8],
) -> Result<(Vec<SolutionVideo>, Option<String>), SourceError> {
    let page: PlaylistPage = serde_json::from_slice(body)
        .map_err(|err| SourceError::Schema(format!("playlist page: {err}")))?;
    let mut videos = Vec::with_capacity(page.items.len());
    for item in &page.items {
        let Some(item) = row_from_value::<PlaylistItem>(platform, item) else {
            continue;
        };
        let Some(snippet) = item.snippet else {
            drop_row(platform, "<unknown>", "playlist item without snippet");
            continue;
        };
        let video_id = snippet.resource_id.and_then(|r| r.video_id);
        let (Some(title), Some(video_id)) = (snippet.title, video_id) else {
            drop_row(platform, "<unknown>", "playlist item missing title or video id");
            continue;
        };
        videos.push(SolutionVideo { video_id, title });
    }
    Ok((videos, page.next_page_token))
}

/// Fold a contest title down to the words worth matching on. "Div."/
/// "Division" collapse to "div" so editions named either way still line up.
fn normalize_contest_title(title: &str) -> String {
    let lowered = title
        .to_lowercase()
        .replace("contest", "")
        .replace("div.", "div")
        .replace("division", "div");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-score match: one point per normalized word longer than two characters
/// found in the video title; anything below two points is no match.
pub fn best_video_for_title<'a>(
    videos: &'a [SolutionVideo],
    contest_title: &str,
) -> Option<&'a SolutionVideo> {
    let needle = normalize_contest_title(contest_title);
    let mut best: Option<&SolutionVideo> = None;
    let mut best_score = 0usize;
    for video in videos {
        let haystack = video.title.to_lowercase();
        let score = needle
            .split(' ')
            .filter(|word| word.len() > 2 && haystack.contains(word))
            .count();
        if score > best_score {
            best_score = score;
            best = Some(video);
        }
    }
    if best_score >= 2 {
        best
    } else {
        None
    }
}

pub fn adapter_for_platform(platform: Platform) -> Box<dyn SourceAdapter> {
    match platform {
        Platform::Codeforces => Box::new(CodeforcesAdapter::default()),
        Platform::LeetCode => Box::new(LeetCodeAdapter::default()),
        Platform::CodeChef => Box::new(CodeChefAdapter::default()),
    }
}

pub fn default_adapters() -> Vec<Box<dyn SourceAdapter>> {
    Platform::ALL.into_iter().map(adapter_for_platform).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrack_core::contest_identity;

    const CODEFORCES_FIXTURE: &str = r#"{
        "status": "OK",
        "result": [
            {"id": 1934, "name": "Codeforces Round 930", "phase": "BEFORE",
             "durationSeconds": 7200, "startTimeSeconds": 1767225600},
            {"id": 100001, "name": "Gym Practice", "durationSeconds": 18000},
            {"id": 1933, "name": "Codeforces Round 929", "phase": "FINISHED",
             "durationSeconds": 8100, "startTimeSeconds": 1766620800}
        ]
    }"#;

    const LEETCODE_FIXTURE: &str = r#"{
        "contests": [
            {"title": "Weekly Contest 400", "title_slug": "weekly-contest-400",
             "start_time": 1767340800, "duration": 5400},
            {"title": "Broken Row", "start_time": "not-a-number"},
            {"title": "Biweekly Contest 130", "title_slug": "biweekly-contest-130",
             "start_time": 1767081600, "duration": 5400}
        ]
    }"#;

    const CODECHEF_FIXTURE: &str = r#"{
        "status": "success",
        "future_contests": [
            {"contest_code": "START120", "contest_name": "Starters 120",
             "contest_start_date_iso": "2026-03-04T20:00:00+05:30",
             "contest_end_date_iso": "2026-03-04T22:00:00+05:30"}
        ],
        "present_contests": [],
        "past_contests": [
            {"contest_code": "COOK150", "contest_name": "Cook-Off 150",
             "contest_start_date_iso": "garbage",
             "contest_end_date_iso": "2026-02-01T22:00:00+05:30"}
        ]
    }"#;

    #[test]
    fn codeforces_parses_rows_and_drops_unscheduled() {
        let adapter = CodeforcesAdapter::default();
        let raws = adapter.parse(CODEFORCES_FIXTURE.as_bytes()).unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].native_id, "1934");
        assert_eq!(raws[0].duration_secs, Some(7200));
        assert_eq!(raws[0].url, "https://codeforces.com/contests/1934");

        let contest = raws[0].clone().into_contest(Platform::Codeforces).unwrap();
        assert_eq!(contest.identity, contest_identity(Platform::Codeforces, "1934"));
        assert_eq!(
            (contest.end_time - contest.start_time).num_seconds(),
            7200
        );
    }

    #[test]
    fn codeforces_rejects_failed_status_envelope() {
        let adapter = CodeforcesAdapter::default();
        let err = adapter
            .parse(br#"{"status":"FAILED","comment":"rate limit"}"#)
            .unwrap_err();
        assert!(matches!(err, SourceError::Schema(_)));
    }

    #[test]
    fn leetcode_parses_slug_identities() {
        let adapter = LeetCodeAdapter::default();
        let raws = adapter.parse(LEETCODE_FIXTURE.as_bytes()).unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].native_id, "weekly-contest-400");
        assert_eq!(raws[0].url, "https://leetcode.com/contest/weekly-contest-400/");
        assert_eq!(raws[1].native_id, "biweekly-contest-130");
    }

    #[test]
    fn leetcode_top_level_schema_failure_is_fatal() {
        let adapter = LeetCodeAdapter::default();
        assert!(matches!(
            adapter.parse(br#"{"unexpected": true}"#),
            Err(SourceError::Schema(_))
        ));
        assert!(matches!(
            adapter.parse(b"<html>maintenance</html>"),
            Err(SourceError::Schema(_))
        ));
    }

    #[test]
    fn codechef_normalizes_offsets_to_utc() {
        let adapter = CodeChefAdapter::default();
        let raws = adapter.parse(CODECHEF_FIXTURE.as_bytes()).unwrap();
        assert_eq!(raws.len(), 1);
        let contest = raws[0].clone().into_contest(Platform::CodeChef).unwrap();
        assert_eq!(contest.start_time.to_rfc3339(), "2026-03-04T14:30:00+00:00");
        assert_eq!(contest.end_time.to_rfc3339(), "2026-03-04T16:30:00+00:00");
    }

    const PLAYLIST_FIXTURE: &str = r#"{
        "items": [
            {"snippet": {"title": "Codeforces Round 930 Div 2 | Screencast",
             "resourceId": {"videoId": "abc123"}}},
            {"snippet": {"title": "broken item"}},
            {"snippet": {"title": "Weekly Contest 400 | All Solutions",
             "resourceId": {"videoId": "def456"}}}
        ],
        "nextPageToken": "CAUQAA"
    }"#;

    #[test]
    fn playlist_page_parses_items_and_passes_token_through() {
        let (videos, next) =
            parse_playlist_page(Platform::Codeforces, PLAYLIST_FIXTURE.as_bytes()).unwrap();
        assert_eq!(next.as_deref(), Some("CAUQAA"));
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].video_id, "abc123");
        assert_eq!(videos[0].url(), "https://www.youtube.com/watch?v=abc123");

        let (last, next) =
            parse_playlist_page(Platform::Codeforces, br#"{"items": []}"#).unwrap();
        assert!(last.is_empty());
        assert!(next.is_none());

        assert!(matches!(
            parse_playlist_page(Platform::Codeforces, b"<html>quota</html>"),
            Err(SourceError::Schema(_))
        ));
    }

    #[test]
    fn video_match_scores_title_words_with_threshold() {
        let (videos, _) =
            parse_playlist_page(Platform::Codeforces, PLAYLIST_FIXTURE.as_bytes()).unwrap();

        let hit = best_video_for_title(&videos, "Codeforces Round 930 (Div. 2)").unwrap();
        assert_eq!(hit.video_id, "abc123");

        let weekly = best_video_for_title(&videos, "Weekly Contest 400").unwrap();
        assert_eq!(weekly.video_id, "def456");

        assert!(best_video_for_title(&videos, "Starters 120").is_none());
        assert!(best_video_for_title(&[], "Codeforces Round 930").is_none());
    }

    #[test]
    fn solutions_client_builds_paged_urls_over_default_playlists() {
        let client = SolutionsClient::new("test-key");
        for (platform, _) in DEFAULT_SOLUTION_PLAYLISTS {
            assert!(client.playlist_for(platform).is_some());
        }

        let playlist = client.playlist_for(Platform::LeetCode).unwrap();
        let first = client.page_url(playlist, None);
        assert!(first.starts_with(YOUTUBE_PLAYLIST_ENDPOINT));
        assert!(first.contains(&format!("playlistId={playlist}")));
        assert!(first.contains("key=test-key"));
        assert!(!first.contains("pageToken"));
        assert!(client.page_url(playlist, Some("CAUQAA")).contains("&pageToken=CAUQAA"));

        let mut overridden = SolutionsClient::new("k").with_endpoint("http://localhost:1/yt");
        overridden.set_playlist(Platform::CodeChef, "PL-custom");
        assert_eq!(overridden.playlist_for(Platform::CodeChef), Some("PL-custom"));
        assert!(overridden.page_url("PL-custom", None).starts_with("http://localhost:1/yt?"));
    }

    #[test]
    fn registry_covers_every_platform() {
        for platform in Platform::ALL {
            assert_eq!(adapter_for_platform(platform).platform(), platform);
        }
        assert_eq!(default_adapters().len(), Platform::ALL.len());
    }
}
