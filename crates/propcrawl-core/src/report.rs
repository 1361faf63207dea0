use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a pagination walk stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalkEnd {
    /// A page carried no listing cards.
    EmptyPage { page: u32 },
    /// The next-page link was missing.
    NoNextLink { page: u32 },
    /// Too many pages in a row produced no new listings.
    ConsecutiveEmpty { page: u32, count: u32 },
    /// The configured `end_page` was reached.
    PageLimit { page: u32 },
    /// The current listing page could not be fetched.
    FetchFailed { page: u32, reason: String },
}

impl WalkEnd {
    /// Whether the walk ended through normal control flow rather than a failure.
    pub fn is_normal(&self) -> bool {
        !matches!(self, WalkEnd::FetchFailed { .. })
    }
}

impl std::fmt::Display for WalkEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalkEnd::EmptyPage { page } => write!(f, "empty page {}", page),
            WalkEnd::NoNextLink { page } => write!(f, "no next link after page {}", page),
            WalkEnd::ConsecutiveEmpty { page, count } => {
                write!(f, "{} empty pages in a row (last {})", count, page)
            }
            WalkEnd::PageLimit { page } => write!(f, "page limit {}", page),
            WalkEnd::FetchFailed { page, reason } => {
                write!(f, "page {} failed: {}", page, reason)
            }
        }
    }
}

/// Outcome of crawling one listing source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: u32,
    pub discovered: usize,
    pub records: usize,
    pub failed_details: usize,
    pub geocoded: usize,
    pub walk_end: Option<WalkEnd>,
    pub output: Option<PathBuf>,
}

impl RunReport {
    pub fn new(source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            started_at: now,
            finished_at: now,
            pages: 0,
            discovered: 0,
            records: 0,
            failed_details: 0,
            geocoded: 0,
            walk_end: None,
            output: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn elapsed_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}
