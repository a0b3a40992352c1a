use std::{
    env, fmt,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    clients::ProviderKind,
    pipeline::{
        select::scoring::InterestProfile,
        tiers::{TierPlan, TierSpec},
    },
    util::retry::RetryConfig,
};

const DEFAULT_DIGEST_TITLE: &str = "📰 Morning RSS Digest";
const DEFAULT_STATS_PATH: &str = "logs/stats.jsonl";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    profile: InterestProfile,
    exclusions: Vec<String>,
    digest_title: String,
    max_age_hours: u32,
    candidate_buffer_size: usize,
    min_score: i32,
    tier_plan: TierPlan,
    summarizer: SummarizerSettings,
    stats_path: Option<PathBuf>,
}

/// 要約プロバイダの接続設定。プロバイダは設定で明示し、認証情報はそのプロバイダの環境変数からのみ読む。
#[derive(Clone, PartialEq)]
pub struct SummarizerSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub max_concurrency: NonZeroUsize,
    pub retry: RetryConfig,
}

impl fmt::Debug for SummarizerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummarizerSettings")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_concurrency", &self.max_concurrency)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported summarization provider {0:?} (expected one of: anthropic, gemini)")]
    UnsupportedProvider(String),
    #[error("missing environment variable {env} required by summarization provider {provider}")]
    MissingCredential {
        provider: ProviderKind,
        env: &'static str,
    },
    #[error("candidate buffer size {buffer} is smaller than the digest size {digest_size}")]
    BufferTooSmall { buffer: usize, digest_size: usize },
    #[error("keyword {keyword:?} is configured in more than one interest tier")]
    KeywordConflict { keyword: String },
    #[error("blank keyword in {list} list")]
    InvalidKeyword { list: &'static str },
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// YAMLファイルから設定を読み込み、環境変数の上書きと認証情報を適用して検証する。
    ///
    /// # Errors
    /// ファイルの読み込み・パースに失敗した場合、または検証に失敗した場合は [`ConfigError`] を返す。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// YAML文字列から設定を構築する。
    ///
    /// # Errors
    /// パースまたは検証に失敗した場合は [`ConfigError`] を返す。
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: RawConfig = serde_yaml::from_str(raw)?;

        let provider_name = env::var("DIGEST_SUMMARIZER_PROVIDER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(file.summarizer.provider);
        let provider: ProviderKind = provider_name.parse()?;
        let api_key = credential_for(provider)?;

        let max_age_hours = parse_u32("DIGEST_MAX_AGE_HOURS", file.digest.max_age_hours)?;
        if max_age_hours == 0 {
            return Err(ConfigError::Invalid {
                name: "digest.max_age_hours",
                source: anyhow::anyhow!("value must be greater than zero"),
            });
        }

        let profile = InterestProfile::from_tiers(
            file.interests.critical.weight.unwrap_or(3),
            &file.interests.critical.keywords,
            file.interests.standard.weight.unwrap_or(1),
            &file.interests.standard.keywords,
        )?
        .with_penalties(file.interests.penalties.into_iter().flat_map(|group| {
            let weight = group.weight;
            group.keywords.into_iter().map(move |keyword| (keyword, weight))
        }))?;
        let exclusions = normalize_list(file.interests.exclusions, "exclusions")?;

        let tier_plan = TierPlan::new(
            file.digest.tiers.headline,
            file.digest.tiers.summary,
            file.digest.tiers.link,
        )?;
        let candidate_buffer_size = file
            .digest
            .candidate_buffer_size
            .unwrap_or_else(|| tier_plan.total() * 2);
        tier_plan.ensure_buffer(candidate_buffer_size)?;

        let max_concurrency =
            NonZeroUsize::new(file.summarizer.max_concurrency).ok_or(ConfigError::Invalid {
                name: "summarizer.max_concurrency",
                source: anyhow::anyhow!("value must be greater than zero"),
            })?;
        if file.summarizer.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "summarizer.max_attempts",
                source: anyhow::anyhow!("value must be greater than zero"),
            });
        }

        let summarizer = SummarizerSettings {
            provider,
            api_key,
            model: file.summarizer.model.filter(|m| !m.trim().is_empty()),
            base_url: file.summarizer.base_url,
            timeout: Duration::from_secs(file.summarizer.timeout_secs),
            max_concurrency,
            retry: RetryConfig::new(
                file.summarizer.max_attempts,
                file.summarizer.backoff_base_ms,
                file.summarizer.backoff_cap_ms,
            ),
        };

        Ok(Self {
            profile,
            exclusions,
            digest_title: file.digest.title,
            max_age_hours,
            candidate_buffer_size,
            min_score: file.digest.min_score,
            tier_plan,
            summarizer,
            stats_path: file.stats.enabled.then_some(file.stats.path),
        })
    }

    #[must_use]
    pub fn profile(&self) -> &InterestProfile {
        &self.profile
    }

    #[must_use]
    pub fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    #[must_use]
    pub fn digest_title(&self) -> &str {
        &self.digest_title
    }

    #[must_use]
    pub fn max_age_hours(&self) -> u32 {
        self.max_age_hours
    }

    #[must_use]
    pub fn candidate_buffer_size(&self) -> usize {
        self.candidate_buffer_size
    }

    #[must_use]
    pub fn min_score(&self) -> i32 {
        self.min_score
    }

    #[must_use]
    pub fn tier_plan(&self) -> &TierPlan {
        &self.tier_plan
    }

    #[must_use]
    pub fn summarizer(&self) -> &SummarizerSettings {
        &self.summarizer
    }

    /// `None` when stats logging is disabled in the config file.
    #[must_use]
    pub fn stats_path(&self) -> Option<&Path> {
        self.stats_path.as_deref()
    }
}

fn credential_for(provider: ProviderKind) -> Result<String, ConfigError> {
    let name = provider.credential_env();
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingCredential {
            provider,
            env: name,
        })
}

fn normalize_list(values: Vec<String>, list: &'static str) -> Result<Vec<String>, ConfigError> {
    values
        .into_iter()
        .map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::InvalidKeyword { list })
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u32>()
        .map_err(|error| ConfigError::Invalid {
            name,
            source: anyhow::Error::new(error),
        })
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    interests: RawInterests,
    #[serde(default)]
    digest: RawDigest,
    #[serde(default)]
    summarizer: RawSummarizer,
    #[serde(default)]
    stats: RawStats,
}

#[derive(Debug, Default, Deserialize)]
struct RawInterests {
    #[serde(default)]
    critical: RawInterestTier,
    #[serde(default)]
    standard: RawInterestTier,
    #[serde(default)]
    exclusions: Vec<String>,
    #[serde(default)]
    penalties: Vec<RawPenaltyGroup>,
}

/// 減点キーワード群。`weight` は負の値で、マッチしたキーワードごとに一度だけ加算される。
#[derive(Debug, Deserialize)]
struct RawPenaltyGroup {
    #[serde(alias = "score")]
    weight: i32,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInterestTier {
    weight: Option<u32>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDigest {
    title: String,
    max_age_hours: u32,
    candidate_buffer_size: Option<usize>,
    min_score: i32,
    tiers: RawTiers,
}

impl Default for RawDigest {
    fn default() -> Self {
        Self {
            title: DEFAULT_DIGEST_TITLE.to_string(),
            max_age_hours: 24,
            candidate_buffer_size: None,
            min_score: 0,
            tiers: RawTiers::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawTiers {
    headline: TierSpec,
    summary: TierSpec,
    link: TierSpec,
}

impl Default for RawTiers {
    fn default() -> Self {
        Self {
            headline: TierSpec::new(5, Some(10), Some(6000)),
            summary: TierSpec::new(5, Some(10), Some(6000)),
            link: TierSpec::new(10, Some(10), Some(6000)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSummarizer {
    provider: String,
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: u64,
    max_concurrency: usize,
    max_attempts: usize,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl Default for RawSummarizer {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            provider: "anthropic".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 30,
            max_concurrency: 1,
            max_attempts: retry.max_attempts,
            backoff_base_ms: retry.base_delay_ms,
            backoff_cap_ms: retry.max_delay_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawStats {
    enabled: bool,
    path: PathBuf,
}

impl Default for RawStats {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_STATS_PATH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
interests:
  critical:
    keywords: ["biostatistics"]
  standard:
    keywords: ["R programming"]
"#;

    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let mut all: Vec<(&str, Option<&str>)> = vec![
            ("ANTHROPIC_API_KEY", None),
            ("GEMINI_API_KEY", None),
            ("DIGEST_SUMMARIZER_PROVIDER", None),
            ("DIGEST_MAX_AGE_HOURS", None),
        ];
        for (name, value) in vars {
            all.retain(|(existing, _)| existing != name);
            all.push((name, *value));
        }
        temp_env::with_vars(all, f)
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let config = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(MINIMAL).expect("config should load")
        });

        assert_eq!(config.max_age_hours(), 24);
        assert_eq!(config.min_score(), 0);
        assert_eq!(config.tier_plan().total(), 20);
        assert_eq!(config.candidate_buffer_size(), 40);
        assert_eq!(config.summarizer().provider, ProviderKind::Anthropic);
        assert_eq!(config.summarizer().api_key, "sk-test");
        assert_eq!(config.summarizer().max_concurrency.get(), 1);
        assert_eq!(config.summarizer().retry, RetryConfig::default());
        assert_eq!(config.stats_path(), Some(Path::new(DEFAULT_STATS_PATH)));
        assert_eq!(config.profile().weight_of("biostatistics"), Some(3));
        assert_eq!(config.profile().weight_of("r programming"), Some(1));
    }

    #[test]
    fn explicit_provider_reads_only_its_own_credential() {
        let yaml = format!("{MINIMAL}\nsummarizer:\n  provider: Gemini\n");
        let error = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(&yaml).expect_err("gemini key is missing")
        });

        assert!(matches!(
            error,
            ConfigError::MissingCredential {
                provider: ProviderKind::Gemini,
                env: "GEMINI_API_KEY"
            }
        ));
    }

    #[test]
    fn unsupported_provider_is_rejected() {
        let yaml = format!("{MINIMAL}\nsummarizer:\n  provider: openai\n");
        let error = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(&yaml).expect_err("openai is not supported")
        });

        assert!(matches!(error, ConfigError::UnsupportedProvider(name) if name == "openai"));
    }

    #[test]
    fn env_overrides_provider_and_age_window() {
        let config = with_env(
            &[
                ("GEMINI_API_KEY", Some("g-key")),
                ("DIGEST_SUMMARIZER_PROVIDER", Some("gemini")),
                ("DIGEST_MAX_AGE_HOURS", Some("48")),
            ],
            || Config::from_yaml_str(MINIMAL).expect("config should load"),
        );

        assert_eq!(config.summarizer().provider, ProviderKind::Gemini);
        assert_eq!(config.summarizer().api_key, "g-key");
        assert_eq!(config.max_age_hours(), 48);
    }

    #[test]
    fn candidate_buffer_smaller_than_digest_is_rejected() {
        let yaml = format!("{MINIMAL}\ndigest:\n  candidate_buffer_size: 10\n");
        let error = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(&yaml).expect_err("buffer 10 < digest 20")
        });

        assert!(matches!(
            error,
            ConfigError::BufferTooSmall {
                buffer: 10,
                digest_size: 20
            }
        ));
    }

    #[test]
    fn keyword_in_both_tiers_is_rejected() {
        let yaml = r#"
interests:
  critical:
    keywords: ["Rust"]
  standard:
    keywords: ["rust "]
"#;
        let error = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(yaml).expect_err("conflicting keyword")
        });

        assert!(matches!(error, ConfigError::KeywordConflict { keyword } if keyword == "rust"));
    }

    #[test]
    fn invalid_age_override_is_reported() {
        let error = with_env(
            &[
                ("ANTHROPIC_API_KEY", Some("sk-test")),
                ("DIGEST_MAX_AGE_HOURS", Some("a day")),
            ],
            || Config::from_yaml_str(MINIMAL).expect_err("not a number"),
        );

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "DIGEST_MAX_AGE_HOURS",
                ..
            }
        ));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = with_env(&[("ANTHROPIC_API_KEY", Some("sk-secret"))], || {
            Config::from_yaml_str(MINIMAL).expect("config should load")
        });

        let rendered = format!("{:?}", config.summarizer());
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn penalty_groups_load_with_negative_weights() {
        let yaml = r#"
interests:
  critical:
    keywords: ["biostatistics"]
  penalties:
    - weight: -2
      keywords: ["press release"]
    - score: -5
      keywords: ["Webinar", "sponsored content"]
digest:
  min_score: -1
"#;
        let config = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(yaml).expect("config should load")
        });

        assert_eq!(config.profile().weight_of("press release"), Some(-2));
        assert_eq!(config.profile().weight_of("webinar"), Some(-5));
        assert_eq!(config.profile().weight_of("sponsored content"), Some(-5));
        assert_eq!(config.min_score(), -1);
    }

    #[test]
    fn positive_penalty_weight_is_rejected() {
        let yaml = format!("{MINIMAL}  penalties:\n    - weight: 2\n      keywords: [\"advert\"]\n");
        let error = with_env(&[("ANTHROPIC_API_KEY", Some("sk-test"))], || {
            Config::from_yaml_str(&yaml).expect_err("penalties must be negative")
        });

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "interests.penalties",
                ..
            }
        ));
    }
}
