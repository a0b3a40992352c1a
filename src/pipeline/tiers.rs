//! Ranking, tier slicing and message packing.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;
use crate::pipeline::article::{Article, ranking_order};
use crate::util::text::char_len;

/// Presentation tier, from most to least detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Headline,
    Summary,
    Link,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Headline, Tier::Summary, Tier::Link];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Headline => "headline",
            Tier::Summary => "summary",
            Tier::Link => "link",
        }
    }

    const fn index(self) -> usize {
        match self {
            Tier::Headline => 0,
            Tier::Summary => 1,
            Tier::Link => 2,
        }
    }

    /// Characters this article occupies when rendered at this tier's detail level.
    #[must_use]
    pub fn rendered_chars(self, article: &Article) -> usize {
        let base = char_len(article.title()) + char_len(article.url());
        match self {
            Tier::Headline => {
                base + char_len(article.feed_name()) + char_len(article.display_summary())
            }
            Tier::Summary => base + char_len(article.display_summary()),
            Tier::Link => base,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size and per-message budgets of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSpec {
    pub size: usize,
    pub max_items_per_message: Option<usize>,
    pub max_chars_per_message: Option<usize>,
}

impl TierSpec {
    #[must_use]
    pub const fn new(
        size: usize,
        max_items_per_message: Option<usize>,
        max_chars_per_message: Option<usize>,
    ) -> Self {
        Self {
            size,
            max_items_per_message,
            max_chars_per_message,
        }
    }

    /// A tier with no message budgets.
    #[must_use]
    pub const fn unbounded(size: usize) -> Self {
        Self::new(size, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPlan {
    specs: [TierSpec; 3],
}

impl TierPlan {
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when every tier is empty or a budget is zero.
    pub fn new(headline: TierSpec, summary: TierSpec, link: TierSpec) -> Result<Self, ConfigError> {
        let plan = Self {
            specs: [headline, summary, link],
        };
        if plan.total() == 0 {
            return Err(ConfigError::Invalid {
                name: "digest.tiers",
                source: anyhow::anyhow!("at least one tier must have a positive size"),
            });
        }
        for tier in Tier::ALL {
            let spec = plan.spec(tier);
            if spec.max_items_per_message == Some(0) || spec.max_chars_per_message == Some(0) {
                return Err(ConfigError::Invalid {
                    name: "digest.tiers",
                    source: anyhow::anyhow!("{tier} tier message budgets must be positive"),
                });
            }
        }
        Ok(plan)
    }

    #[must_use]
    pub fn spec(&self, tier: Tier) -> &TierSpec {
        &self.specs[tier.index()]
    }

    /// `top_n + next_n + last_n`.
    #[must_use]
    pub fn total(&self) -> usize {
        self.specs.iter().map(|spec| spec.size).sum()
    }

    /// The candidate buffer must be able to fill every tier.
    ///
    /// # Errors
    /// Returns [`ConfigError::BufferTooSmall`] when `buffer < total()`.
    pub fn ensure_buffer(&self, buffer: usize) -> Result<(), ConfigError> {
        let digest_size = self.total();
        if buffer < digest_size {
            return Err(ConfigError::BufferTooSmall {
                buffer,
                digest_size,
            });
        }
        Ok(())
    }
}

/// One outgoing message worth of a single tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryUnit {
    pub tier: Tier,
    /// Positions in the ranked list (rank - 1).
    pub range: Range<usize>,
    pub rendered_chars: usize,
    /// A single article larger than the tier's char budget.
    pub oversized: bool,
}

impl DeliveryUnit {
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    #[must_use]
    pub fn first_rank(&self) -> usize {
        self.range.start + 1
    }

    #[must_use]
    pub fn last_rank(&self) -> usize {
        self.range.end
    }
}

/// Borrowed views of the three tiers of a [`Digest`].
#[derive(Debug, Clone, Copy)]
pub struct DigestTiers<'a> {
    pub headline: &'a [Article],
    pub summary: &'a [Article],
    pub link: &'a [Article],
}

impl<'a> DigestTiers<'a> {
    #[must_use]
    pub fn get(&self, tier: Tier) -> &'a [Article] {
        match tier {
            Tier::Headline => self.headline,
            Tier::Summary => self.summary,
            Tier::Link => self.link,
        }
    }
}

/// The ranked articles of a run together with their tier layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    articles: Vec<Article>,
    bounds: [Range<usize>; 3],
    units: Vec<DeliveryUnit>,
    discarded: usize,
}

impl Digest {
    #[must_use]
    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.articles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    #[must_use]
    pub fn tier(&self, tier: Tier) -> &[Article] {
        &self.articles[self.bounds[tier.index()].clone()]
    }

    #[must_use]
    pub fn tiers(&self) -> DigestTiers<'_> {
        DigestTiers {
            headline: self.tier(Tier::Headline),
            summary: self.tier(Tier::Summary),
            link: self.tier(Tier::Link),
        }
    }

    #[must_use]
    pub fn units(&self) -> &[DeliveryUnit] {
        &self.units
    }

    pub fn units_for(&self, tier: Tier) -> impl Iterator<Item = &DeliveryUnit> {
        self.units.iter().filter(move |unit| unit.tier == tier)
    }

    #[must_use]
    pub fn unit_count(&self, tier: Tier) -> usize {
        self.units_for(tier).count()
    }

    /// How many times a tier had to be split across messages.
    #[must_use]
    pub fn split_count(&self, tier: Tier) -> usize {
        self.unit_count(tier).saturating_sub(1)
    }

    /// Candidates that ranked below the last tier.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Articles paired with the tier they landed in, in rank order.
    pub fn ranked(&self) -> impl Iterator<Item = (Tier, &Article)> {
        Tier::ALL
            .into_iter()
            .flat_map(move |tier| self.tier(tier).iter().map(move |article| (tier, article)))
    }
}

#[derive(Debug, Clone)]
pub struct TierAssembler {
    plan: TierPlan,
}

impl TierAssembler {
    #[must_use]
    pub fn new(plan: TierPlan) -> Self {
        Self { plan }
    }

    #[must_use]
    pub fn plan(&self) -> &TierPlan {
        &self.plan
    }

    /// Ranks the candidates, slices them into tiers and packs each tier into delivery units.
    #[must_use]
    pub fn assemble(&self, mut candidates: Vec<Article>) -> Digest {
        candidates.sort_by(ranking_order);
        let total = self.plan.total();
        let discarded = candidates.len().saturating_sub(total);
        candidates.truncate(total);

        for (position, article) in candidates.iter_mut().enumerate() {
            article.assign_rank(u32::try_from(position + 1).unwrap_or(u32::MAX));
        }

        let len = candidates.len();
        let headline_end = self.plan.spec(Tier::Headline).size.min(len);
        let summary_end = (headline_end + self.plan.spec(Tier::Summary).size).min(len);
        let bounds = [0..headline_end, headline_end..summary_end, summary_end..len];

        let units = Tier::ALL
            .into_iter()
            .flat_map(|tier| {
                let range = bounds[tier.index()].clone();
                pack(tier, self.plan.spec(tier), &candidates[range.clone()], range.start)
            })
            .collect();

        Digest {
            articles: candidates,
            bounds,
            units,
            discarded,
        }
    }
}

/// Greedy first-fit in rank order. Never reorders, truncates or drops.
fn pack(tier: Tier, spec: &TierSpec, articles: &[Article], offset: usize) -> Vec<DeliveryUnit> {
    let mut units = Vec::new();
    let mut start = offset;
    let mut chars = 0;

    for (index, article) in articles.iter().enumerate() {
        let position = offset + index;
        let size = tier.rendered_chars(article);
        let count = position - start;

        if spec.max_chars_per_message.is_some_and(|max| size > max) {
            if count > 0 {
                units.push(unit(tier, start..position, chars, false));
            }
            warn!(
                tier = %tier,
                rank = position + 1,
                rendered_chars = size,
                url = %article.url(),
                "article exceeds the message size budget; sending it alone"
            );
            units.push(unit(tier, position..position + 1, size, true));
            start = position + 1;
            chars = 0;
            continue;
        }

        let fits_items = spec.max_items_per_message.is_none_or(|max| count < max);
        let fits_chars = spec
            .max_chars_per_message
            .is_none_or(|max| chars + size <= max);
        if count > 0 && !(fits_items && fits_chars) {
            units.push(unit(tier, start..position, chars, false));
            start = position;
            chars = 0;
        }
        chars += size;
    }

    let end = offset + articles.len();
    if start < end {
        units.push(unit(tier, start..end, chars, false));
    }
    units
}

fn unit(tier: Tier, range: Range<usize>, rendered_chars: usize, oversized: bool) -> DeliveryUnit {
    DeliveryUnit {
        tier,
        range,
        rendered_chars,
        oversized,
    }
}
