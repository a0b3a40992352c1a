/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// 要約プロバイダ呼び出しの一時的な失敗に使う。Full Jitter 戦略。
use std::time::Duration;

use rand::Rng;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// `attempt` は0始まり。0 のときは待たない。
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
        let exponential_delay = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let capped_delay = exponential_delay.min(self.max_delay_ms);

        let jittered_delay = if capped_delay > 0 {
            rand::rng().random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    /// この試行回数でまだ再試行できるかどうか。
    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// reqwest のエラーが再試行可能かどうかを判定する。
///
/// タイムアウト、接続エラー、5xx、429 を再試行可能とみなす。
pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    error.status().is_some_and(is_retryable_status)
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}
