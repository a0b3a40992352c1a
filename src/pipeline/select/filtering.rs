//! Recency and exclusion filtering for the select stage.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use chrono::{DateTime, Duration, Utc};

use crate::config::ConfigError;

/// Drops articles whose title or summary mentions an excluded term.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    terms: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl ExclusionFilter {
    /// # Errors
    /// Returns [`ConfigError::InvalidKeyword`] for blank terms.
    pub fn new(terms: &[String]) -> Result<Self, ConfigError> {
        let mut normalized: Vec<String> = Vec::with_capacity(terms.len());
        for term in terms {
            let term = term.trim().to_lowercase();
            if term.is_empty() {
                return Err(ConfigError::InvalidKeyword { list: "exclusions" });
            }
            if !normalized.contains(&term) {
                normalized.push(term);
            }
        }

        let matcher = if normalized.is_empty() {
            None
        } else {
            let ac = AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&normalized)
                .map_err(|error| ConfigError::Invalid {
                    name: "interests.exclusions",
                    source: anyhow::Error::new(error),
                })?;
            Some(ac)
        };

        Ok(Self {
            terms: normalized,
            matcher,
        })
    }

    /// The first excluded term found, if any.
    #[must_use]
    pub fn matched_term(&self, title: &str, raw_summary: &str) -> Option<&str> {
        let matcher = self.matcher.as_ref()?;
        [title, raw_summary].into_iter().find_map(|field| {
            matcher
                .find(&field.to_lowercase())
                .map(|found| self.terms[found.pattern().as_usize()].as_str())
        })
    }

    #[must_use]
    pub fn is_excluded(&self, title: &str, raw_summary: &str) -> bool {
        self.matched_term(title, raw_summary).is_some()
    }
}

/// An article is fresh when it was published no more than `max_age` before `now`.
///
/// Timestamps in the future count as fresh.
#[must_use]
pub(crate) fn is_fresh(published_at: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    now.signed_duration_since(published_at) <= max_age
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_term_in_title_or_summary_is_found() {
        let filter =
            ExclusionFilter::new(&["Sponsored".to_string(), "webinar".to_string()]).unwrap();

        assert_eq!(filter.matched_term("SPONSORED: new laptop", ""), Some("sponsored"));
        assert_eq!(filter.matched_term("Title", "join our Webinar"), Some("webinar"));
        assert!(!filter.is_excluded("Plain news", "nothing to see"));
    }

    #[test]
    fn empty_filter_excludes_nothing() {
        let filter = ExclusionFilter::new(&[]).unwrap();
        assert!(!filter.is_excluded("Sponsored", "webinar"));
    }

    #[test]
    fn blank_term_is_rejected() {
        let error = ExclusionFilter::new(&[" ".to_string()]).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidKeyword { list: "exclusions" }));
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let now = Utc::now();
        let window = Duration::hours(24);

        assert!(is_fresh(now - Duration::hours(24), now, window));
        assert!(!is_fresh(now - Duration::hours(25), now, window));
        assert!(is_fresh(now + Duration::hours(1), now, window));
    }
}
