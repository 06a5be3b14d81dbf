//! Core domain model for ctrack: platforms, contest identity, bookmarks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ctrack-core";

/// Closed set of upstream platforms the aggregator knows how to ingest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Platform {
    Codeforces,
    LeetCode,
    CodeChef,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Codeforces, Platform::LeetCode, Platform::CodeChef];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Codeforces => "Codeforces",
            Platform::LeetCode => "LeetCode",
            Platform::CodeChef => "CodeChef",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codeforces" => Ok(Platform::Codeforces),
            "leetcode" => Ok(Platform::LeetCode),
            "codechef" => Ok(Platform::CodeChef),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Deterministic identity for a contest: UUIDv5 over the provider-scoped key.
///
/// The same `(platform, native_id)` pair always maps to the same identity, so
/// a contest keeps its identity across refresh cycles even when every other
/// field drifts upstream.
pub fn contest_identity(platform: Platform, native_id: &str) -> Uuid {
    let key = format!("ctrack:{}:{}", platform.as_str(), native_id);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// Derived contest state. Never persisted; recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContestStatus {
    Upcoming,
    Past,
}

/// Canonical, source-independent contest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub identity: Uuid,
    pub platform: Platform,
    pub native_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub url: String,
}

impl Contest {
    /// Pure function of `start_time` and the supplied clock.
    pub fn status(&self, now: DateTime<Utc>) -> ContestStatus {
        if self.start_time > now {
            ContestStatus::Upcoming
        } else {
            ContestStatus::Past
        }
    }

    pub fn snapshot(&self) -> ContestSnapshot {
        ContestSnapshot {
            title: self.title.clone(),
            platform: self.platform,
            start_time: self.start_time,
            url: self.url.clone(),
        }
    }
}

/// Per-record validation failure. Records failing validation are dropped and
/// counted by the aggregator, never fatal for the batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record {native_id}: empty title")]
    EmptyTitle { native_id: String },
    #[error("record {native_id}: empty url")]
    EmptyUrl { native_id: String },
    #[error("record {native_id}: no end time or duration")]
    MissingEnd { native_id: String },
    #[error("record {native_id}: end time precedes start time")]
    EndBeforeStart { native_id: String },
}

/// Pre-validation handoff contract from a source adapter into the pipeline.
///
/// Adapters only normalize shape; `into_contest` owns the invariants
/// (non-empty title/url, `end_time >= start_time`, duration fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContest {
    pub native_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub url: String,
}

impl RawContest {
    pub fn into_contest(self, platform: Platform) -> Result<Contest, RecordError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(RecordError::EmptyTitle {
                native_id: self.native_id,
            });
        }
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(RecordError::EmptyUrl {
                native_id: self.native_id,
            });
        }

        let end_time = match (self.end_time, self.duration_secs) {
            (Some(end), _) => end,
            (None, Some(secs)) => self.start_time + Duration::seconds(secs),
            (None, None) => {
                return Err(RecordError::MissingEnd {
                    native_id: self.native_id,
                })
            }
        };
        if end_time < self.start_time {
            return Err(RecordError::EndBeforeStart {
                native_id: self.native_id,
            });
        }

        Ok(Contest {
            identity: contest_identity(platform, &self.native_id),
            platform,
            native_id: self.native_id,
            title,
            start_time: self.start_time,
            end_time,
            url,
        })
    }
}

/// Denormalized contest fields captured into a bookmark at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestSnapshot {
    pub title: String,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    pub url: String,
}

/// User ↔ contest relation. Self-contained: holds its own copy of the
/// contest fields plus the identity key, so it survives catalog rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub user_id: String,
    pub contest_identity: Uuid,
    pub title: String,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).single().unwrap()
    }

    fn raw(native_id: &str) -> RawContest {
        RawContest {
            native_id: native_id.to_string(),
            title: "Weekly Round".to_string(),
            start_time: ts(10),
            end_time: Some(ts(12)),
            duration_secs: None,
            url: "https://example.com/contest/1".to_string(),
        }
    }

    #[test]
    fn identity_is_deterministic_and_provider_scoped() {
        let a = contest_identity(Platform::Codeforces, "1934");
        let b = contest_identity(Platform::Codeforces, "1934");
        let c = contest_identity(Platform::LeetCode, "1934");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, contest_identity(Platform::Codeforces, "1935"));
    }

    #[test]
    fn end_time_derived_from_duration_when_absent() {
        let mut r = raw("42");
        r.end_time = None;
        r.duration_secs = Some(7200);
        let contest = r.into_contest(Platform::LeetCode).unwrap();
        assert_eq!(contest.end_time, ts(12));
    }

    #[test]
    fn explicit_end_time_wins_over_duration() {
        let mut r = raw("42");
        r.duration_secs = Some(60);
        let contest = r.into_contest(Platform::CodeChef).unwrap();
        assert_eq!(contest.end_time, ts(12));
    }

    #[test]
    fn validation_rejects_bad_records() {
        let mut no_title = raw("a");
        no_title.title = "   ".to_string();
        assert!(matches!(
            no_title.into_contest(Platform::Codeforces),
            Err(RecordError::EmptyTitle { .. })
        ));

        let mut no_url = raw("b");
        no_url.url = String::new();
        assert!(matches!(
            no_url.into_contest(Platform::Codeforces),
            Err(RecordError::EmptyUrl { .. })
        ));

        let mut no_end = raw("c");
        no_end.end_time = None;
        no_end.duration_secs = None;
        assert!(matches!(
            no_end.into_contest(Platform::Codeforces),
            Err(RecordError::MissingEnd { .. })
        ));

        let mut inverted = raw("d");
        inverted.end_time = Some(ts(9));
        assert!(matches!(
            inverted.into_contest(Platform::Codeforces),
            Err(RecordError::EndBeforeStart { .. })
        ));
    }

    #[test]
    fn status_is_pure_in_now() {
        let contest = raw("e").into_contest(Platform::Codeforces).unwrap();
        assert_eq!(contest.status(ts(9)), ContestStatus::Upcoming);
        assert_eq!(contest.status(ts(10)), ContestStatus::Past);
        assert_eq!(contest.status(ts(11)), ContestStatus::Past);
    }

    #[test]
    fn platform_round_trips_through_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert_eq!("codeforces".parse::<Platform>().unwrap(), Platform::Codeforces);
        assert!("topcoder".parse::<Platform>().is_err());
    }
}
