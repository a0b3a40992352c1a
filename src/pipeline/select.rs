//! Recency filter, exclusion filter, keyword scoring and candidate trimming.

pub mod filtering;
pub mod scoring;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::ConfigError;
use crate::pipeline::article::{Article, ranking_order};

use self::filtering::{ExclusionFilter, is_fresh};
use self::scoring::{InterestProfile, KeywordScorer};

/// Counts for one selection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub input: usize,
    pub stale: usize,
    pub excluded: usize,
    pub below_min_score: usize,
    pub scored: usize,
    pub candidates: usize,
}

impl SelectionStats {
    /// Articles that were fresh enough to be considered at all.
    #[must_use]
    pub fn fresh(&self) -> usize {
        self.input - self.stale
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidates: Vec<Article>,
    pub stats: SelectionStats,
}

/// Picks the candidate buffer that will be summarized and ranked.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    max_age: Duration,
    scorer: KeywordScorer,
    exclusions: ExclusionFilter,
    min_score: i32,
    buffer_size: usize,
}

impl CandidateSelector {
    /// # Errors
    /// Returns a [`ConfigError`] if the keyword or exclusion matchers cannot be built.
    pub fn new(
        max_age_hours: u32,
        profile: &InterestProfile,
        exclusions: &[String],
        min_score: i32,
        buffer_size: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            max_age: Duration::hours(i64::from(max_age_hours)),
            scorer: KeywordScorer::new(profile)?,
            exclusions: ExclusionFilter::new(exclusions)?,
            min_score,
            buffer_size,
        })
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Filters, scores, sorts and trims `articles` relative to `now`.
    #[must_use]
    pub fn select(&self, articles: Vec<Article>, now: DateTime<Utc>) -> Selection {
        let mut stats = SelectionStats {
            input: articles.len(),
            ..SelectionStats::default()
        };

        let mut scored = Vec::with_capacity(articles.len());
        for mut article in articles {
            if !is_fresh(article.published_at(), now, self.max_age) {
                stats.stale += 1;
                continue;
            }
            if let Some(term) = self
                .exclusions
                .matched_term(article.title(), article.raw_summary())
            {
                debug!(url = %article.url(), term, "article excluded");
                stats.excluded += 1;
                continue;
            }

            self.scorer.apply(&mut article);
            if article.score() < self.min_score {
                stats.below_min_score += 1;
                continue;
            }
            scored.push(article);
        }
        stats.scored = scored.len();

        scored.sort_by(ranking_order);
        scored.truncate(self.buffer_size);
        stats.candidates = scored.len();

        Selection {
            candidates: scored,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn profile() -> InterestProfile {
        InterestProfile::from_tiers(
            3,
            &["biostatistics".to_string()],
            1,
            &["R programming".to_string()],
        )
        .unwrap()
    }

    fn article(title: &str, feed: &str, age_hours: i64, now: DateTime<Utc>) -> Article {
        Article::new(
            title,
            format!("https://example.com/{}", title.replace(' ', "-")),
            "",
            feed,
            now - Duration::hours(age_hours),
        )
    }

    #[test]
    fn stale_articles_are_dropped_before_scoring() {
        let now = Utc::now();
        let selector = CandidateSelector::new(24, &profile(), &[], 0, 10).unwrap();
        let selection = selector.select(
            vec![
                article("biostatistics today", "a", 2, now),
                article("biostatistics last week", "a", 24 * 7, now),
            ],
            now,
        );

        assert_eq!(selection.stats.stale, 1);
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].title(), "biostatistics today");
    }

    #[test]
    fn exclusions_and_min_score_are_counted() {
        let now = Utc::now();
        let selector =
            CandidateSelector::new(24, &profile(), &["sponsored".to_string()], 1, 10).unwrap();
        let selection = selector.select(
            vec![
                article("Sponsored biostatistics webinar", "a", 1, now),
                article("Nothing relevant", "a", 1, now),
                article("R programming tips", "a", 1, now),
            ],
            now,
        );

        assert_eq!(selection.stats.excluded, 1);
        assert_eq!(selection.stats.below_min_score, 1);
        assert_eq!(selection.stats.candidates, 1);
    }

    #[test]
    fn candidates_are_sorted_and_trimmed_to_buffer() {
        let now = Utc::now();
        let selector = CandidateSelector::new(24, &profile(), &[], 0, 2).unwrap();
        let selection = selector.select(
            vec![
                article("plain", "a", 1, now),
                article("R programming", "a", 1, now),
                article("biostatistics", "a", 3, now),
                article("biostatistics newer", "a", 2, now),
            ],
            now,
        );

        let titles: Vec<&str> = selection.candidates.iter().map(Article::title).collect();
        assert_eq!(titles, vec!["biostatistics newer", "biostatistics"]);
        assert_eq!(selection.stats.scored, 4);
        assert_eq!(selection.stats.candidates, 2);
    }

    #[test]
    fn duplicates_are_kept() {
        let now = Utc::now();
        let selector = CandidateSelector::new(24, &profile(), &[], 0, 10).unwrap();
        let dup = article("biostatistics", "a", 1, now);
        let selection = selector.select(vec![dup.clone(), dup], now);

        assert_eq!(selection.candidates.len(), 2);
    }

    #[test]
    fn empty_input_yields_empty_selection() {
        let selector = CandidateSelector::new(24, &profile(), &[], 0, 10).unwrap();
        let selection = selector.select(Vec::new(), Utc::now());

        assert!(selection.candidates.is_empty());
        assert_eq!(selection.stats, SelectionStats::default());
    }

    #[test]
    fn penalties_can_push_articles_below_min_score() {
        let now = Utc::now();
        let profile = profile()
            .with_penalties([("press release".to_string(), -2)])
            .unwrap();
        let selector = CandidateSelector::new(24, &profile, &[], 0, 10).unwrap();
        let selection = selector.select(
            vec![
                article("biostatistics press release", "a", 1, now),
                article("R programming press release", "a", 1, now),
                article("plain press release", "a", 1, now),
                article("plain", "a", 1, now),
            ],
            now,
        );

        let scores: Vec<i32> = selection.candidates.iter().map(Article::score).collect();
        assert_eq!(scores, vec![1, 0]);
        assert_eq!(selection.stats.below_min_score, 2);
    }

    #[test]
    fn negative_min_score_keeps_penalized_articles() {
        let now = Utc::now();
        let profile = profile()
            .with_penalties([("press release".to_string(), -2)])
            .unwrap();
        let selector = CandidateSelector::new(24, &profile, &[], -2, 10).unwrap();
        let selection = selector.select(
            vec![
                article("plain press release", "a", 1, now),
                article("plain", "a", 1, now),
            ],
            now,
        );

        let titles: Vec<&str> = selection.candidates.iter().map(Article::title).collect();
        assert_eq!(titles, vec!["plain", "plain press release"]);
        assert_eq!(selection.stats.below_min_score, 0);
    }

    const TITLES: [&str; 4] = [
        "biostatistics",
        "R programming",
        "biostatistics in R programming",
        "unrelated",
    ];

    proptest! {
        #[test]
        fn rank_order_does_not_depend_on_input_order(
            (specs, shuffled) in proptest::collection::vec((0usize..4, 0i64..4), 0..24)
                .prop_flat_map(|specs| {
                    let order: Vec<usize> = (0..specs.len()).collect();
                    (Just(specs), Just(order).prop_shuffle())
                }),
        ) {
            let now = Utc::now();
            // Distinct feed names make the ranking key total.
            let articles: Vec<Article> = specs
                .iter()
                .enumerate()
                .map(|(i, (title, age))| {
                    Article::new(
                        TITLES[*title],
                        format!("https://example.com/{i}"),
                        "",
                        format!("feed-{i:02}"),
                        now - Duration::hours(*age),
                    )
                })
                .collect();
            let reordered: Vec<Article> = shuffled.iter().map(|i| articles[*i].clone()).collect();
            let selector = CandidateSelector::new(24, &profile(), &[], 0, 10).unwrap();

            let urls = |selection: Selection| -> Vec<String> {
                selection.candidates.iter().map(|a| a.url().to_string()).collect()
            };
            let first = urls(selector.select(articles.clone(), now));

            prop_assert_eq!(&first, &urls(selector.select(reordered, now)));
            prop_assert_eq!(&first, &urls(selector.select(articles, now)));
        }
    }
}
