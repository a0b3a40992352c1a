//! Keyword scoring for the select stage.
//!
//! Keywords match as case-insensitive substrings, so "AI" also hits "said".
//! Each configured keyword counts at most once per article no matter how
//! often it occurs or whether it appears in the title, the summary, or both.
//! Penalty keywords work the same way with a negative weight, so a score can
//! drop below zero.

use std::collections::{BTreeMap, BTreeSet};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::config::ConfigError;
use crate::pipeline::article::Article;

/// Interest keywords split into a critical and a standard tier, plus
/// optional penalty keywords.
///
/// Keys are trimmed and lowercased; the configured spelling is kept for
/// reporting. A keyword may live in only one of the three sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestProfile {
    critical: BTreeMap<String, WeightedKeyword>,
    standard: BTreeMap<String, WeightedKeyword>,
    penalties: BTreeMap<String, WeightedKeyword>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WeightedKeyword {
    spelling: String,
    weight: i32,
}

impl InterestProfile {
    /// Builds a profile where every keyword of a tier shares the tier weight.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidKeyword`] for blank keywords and
    /// [`ConfigError::KeywordConflict`] when a keyword appears in both tiers.
    pub fn from_tiers(
        critical_weight: u32,
        critical: &[String],
        standard_weight: u32,
        standard: &[String],
    ) -> Result<Self, ConfigError> {
        Self::new(
            critical.iter().map(|k| (k.clone(), critical_weight)),
            standard.iter().map(|k| (k.clone(), standard_weight)),
        )
    }

    /// # Errors
    /// See [`InterestProfile::from_tiers`].
    pub fn new(
        critical: impl IntoIterator<Item = (String, u32)>,
        standard: impl IntoIterator<Item = (String, u32)>,
    ) -> Result<Self, ConfigError> {
        let critical = normalize_tier(positive(critical, "interests.critical")?, "critical")?;
        let standard = normalize_tier(positive(standard, "interests.standard")?, "standard")?;

        if let Some(keyword) = critical.keys().find(|k| standard.contains_key(*k)) {
            return Err(ConfigError::KeywordConflict {
                keyword: keyword.clone(),
            });
        }

        Ok(Self {
            critical,
            standard,
            penalties: BTreeMap::new(),
        })
    }

    /// Adds penalty keywords. Each pair is a keyword and its (negative) weight;
    /// when a keyword repeats, the first weight wins.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a weight that is not below zero,
    /// [`ConfigError::InvalidKeyword`] for blank keywords and
    /// [`ConfigError::KeywordConflict`] when a penalty keyword is also an
    /// interest keyword.
    pub fn with_penalties(
        mut self,
        penalties: impl IntoIterator<Item = (String, i32)>,
    ) -> Result<Self, ConfigError> {
        let penalties: Vec<(String, i32)> = penalties.into_iter().collect();
        if let Some((keyword, weight)) = penalties.iter().find(|(_, weight)| *weight >= 0) {
            return Err(ConfigError::Invalid {
                name: "interests.penalties",
                source: anyhow::anyhow!("penalty weight for {keyword:?} must be negative, got {weight}"),
            });
        }

        let penalties = normalize_tier(penalties, "penalties")?;
        if let Some(keyword) = penalties
            .keys()
            .find(|k| self.critical.contains_key(*k) || self.standard.contains_key(*k))
        {
            return Err(ConfigError::KeywordConflict {
                keyword: keyword.clone(),
            });
        }

        self.penalties = penalties;
        Ok(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.critical.len() + self.standard.len() + self.penalties.len()
    }

    /// Weight of a keyword in whichever set holds it.
    #[must_use]
    pub fn weight_of(&self, keyword: &str) -> Option<i32> {
        let key = keyword.trim().to_lowercase();
        self.critical
            .get(&key)
            .or_else(|| self.standard.get(&key))
            .or_else(|| self.penalties.get(&key))
            .map(|entry| entry.weight)
    }

    /// `(lowercased pattern, configured spelling, weight)` for every keyword.
    fn entries(&self) -> impl Iterator<Item = (&str, &str, i32)> {
        self.critical
            .iter()
            .chain(self.standard.iter())
            .chain(self.penalties.iter())
            .map(|(key, entry)| (key.as_str(), entry.spelling.as_str(), entry.weight))
    }
}

fn positive(
    entries: impl IntoIterator<Item = (String, u32)>,
    name: &'static str,
) -> Result<Vec<(String, i32)>, ConfigError> {
    entries
        .into_iter()
        .map(|(keyword, weight)| {
            i32::try_from(weight)
                .map(|weight| (keyword, weight))
                .map_err(|error| ConfigError::Invalid {
                    name,
                    source: anyhow::Error::new(error),
                })
        })
        .collect()
}

fn normalize_tier(
    entries: impl IntoIterator<Item = (String, i32)>,
    tier: &'static str,
) -> Result<BTreeMap<String, WeightedKeyword>, ConfigError> {
    let mut normalized = BTreeMap::new();
    for (keyword, weight) in entries {
        let spelling = keyword.trim();
        if spelling.is_empty() {
            return Err(ConfigError::InvalidKeyword { list: tier });
        }
        // Case variants within a tier collapse to the first occurrence.
        normalized
            .entry(spelling.to_lowercase())
            .or_insert_with(|| WeightedKeyword {
                spelling: spelling.to_string(),
                weight,
            });
    }
    Ok(normalized)
}

/// Result of scoring one article.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordScore {
    pub score: i32,
    pub matched_keywords: BTreeSet<String>,
}

/// Aho-Corasick matcher over every keyword in an [`InterestProfile`].
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    /// Configured spelling and weight, indexed by pattern id.
    keywords: Vec<(String, i32)>,
    matcher: Option<AhoCorasick>,
}

impl KeywordScorer {
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the automaton cannot be built.
    pub fn new(profile: &InterestProfile) -> Result<Self, ConfigError> {
        let patterns: Vec<&str> = profile.entries().map(|(pattern, _, _)| pattern).collect();
        let keywords: Vec<(String, i32)> = profile
            .entries()
            .map(|(_, spelling, weight)| (spelling.to_string(), weight))
            .collect();

        let matcher = if patterns.is_empty() {
            tracing::warn!("interest profile is empty; every article will score 0");
            None
        } else {
            let ac = AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .build(&patterns)
                .map_err(|error| ConfigError::Invalid {
                    name: "interests",
                    source: anyhow::Error::new(error),
                })?;
            Some(ac)
        };

        Ok(Self { keywords, matcher })
    }

    /// Sums the weight of every distinct keyword found in the title or summary.
    #[must_use]
    pub fn score(&self, title: &str, raw_summary: &str) -> KeywordScore {
        let Some(matcher) = &self.matcher else {
            return KeywordScore::default();
        };

        let mut hit = vec![false; self.keywords.len()];
        for field in [title, raw_summary] {
            let haystack = field.to_lowercase();
            for found in matcher.find_overlapping_iter(&haystack) {
                hit[found.pattern().as_usize()] = true;
            }
        }

        let mut result = KeywordScore::default();
        for ((keyword, weight), _) in self.keywords.iter().zip(&hit).filter(|(_, h)| **h) {
            result.score = result.score.saturating_add(*weight);
            result.matched_keywords.insert(keyword.clone());
        }
        result
    }

    pub(crate) fn apply(&self, article: &mut Article) {
        let KeywordScore {
            score,
            matched_keywords,
        } = self.score(article.title(), article.raw_summary());
        article.set_score(score, matched_keywords);
    }
}
