//! The article record that flows through every stage of a digest run.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text used when neither the provider nor the feed produced a summary.
pub const SUMMARY_PLACEHOLDER: &str = "No summary available.";

/// Where the delivered summary text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryOrigin {
    /// Produced by the summarization provider.
    Generated,
    /// Provider failed; the feed's own summary (or the placeholder) is used.
    Fallback,
}

/// A fetched article plus everything the pipeline learns about it.
///
/// Feed fields are read-only after construction. Scoring, summarization and
/// ranking fill in the rest through crate-internal setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    title: String,
    url: String,
    raw_summary: String,
    feed_name: String,
    published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary_origin: Option<SummaryOrigin>,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    matched_keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rank: Option<u32>,
}

impl Article {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        raw_summary: impl Into<String>,
        feed_name: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            raw_summary: raw_summary.into(),
            feed_name: feed_name.into(),
            published_at,
            ai_summary: None,
            summary_origin: None,
            score: 0,
            matched_keywords: BTreeSet::new(),
            rank: None,
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn raw_summary(&self) -> &str {
        &self.raw_summary
    }

    #[must_use]
    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    #[must_use]
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    #[must_use]
    pub fn ai_summary(&self) -> Option<&str> {
        self.ai_summary.as_deref()
    }

    #[must_use]
    pub fn summary_origin(&self) -> Option<SummaryOrigin> {
        self.summary_origin
    }

    #[must_use]
    pub fn score(&self) -> i32 {
        self.score
    }

    #[must_use]
    pub fn matched_keywords(&self) -> &BTreeSet<String> {
        &self.matched_keywords
    }

    #[must_use]
    pub fn rank(&self) -> Option<u32> {
        self.rank
    }

    /// Summary text to show: the AI summary when present, else the feed's own.
    #[must_use]
    pub fn display_summary(&self) -> &str {
        match self.ai_summary.as_deref() {
            Some(summary) => summary,
            None if self.raw_summary.trim().is_empty() => SUMMARY_PLACEHOLDER,
            None => &self.raw_summary,
        }
    }

    pub(crate) fn set_score(&mut self, score: i32, matched_keywords: BTreeSet<String>) {
        self.score = score;
        self.matched_keywords = matched_keywords;
    }

    pub(crate) fn set_generated_summary(&mut self, summary: String) {
        self.ai_summary = Some(summary);
        self.summary_origin = Some(SummaryOrigin::Generated);
    }

    pub(crate) fn set_fallback_summary(&mut self) {
        let fallback = if self.raw_summary.trim().is_empty() {
            SUMMARY_PLACEHOLDER.to_string()
        } else {
            self.raw_summary.clone()
        };
        self.ai_summary = Some(fallback);
        self.summary_origin = Some(SummaryOrigin::Fallback);
    }

    /// Ranks are handed out once by the tier assembler and never renumbered.
    pub(crate) fn assign_rank(&mut self, rank: u32) {
        debug_assert!(self.rank.is_none(), "article ranked twice: {}", self.url);
        self.rank = Some(rank);
    }
}

/// Digest ordering: score desc, then newer first, then feed name asc.
///
/// Used with a stable sort, so equal keys keep their input order.
#[must_use]
pub fn ranking_order(a: &Article, b: &Article) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.feed_name.cmp(&b.feed_name))
}
