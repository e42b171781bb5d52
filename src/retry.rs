//! 一時的なUI失敗のリトライ

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::ScraperError;

/// リトライ設定
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn start(&self, action: &'static str) -> Backoff {
        Backoff {
            policy: *self,
            action,
            attempt: 0,
        }
    }
}

/// 1回の操作に対するリトライ状態
///
/// ```rust,ignore
/// let mut backoff = policy.start("open ride");
/// loop {
///     match driver.open_ride(&entry).await {
///         Ok(()) => break,
///         Err(e) => backoff.retry(e).await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    action: &'static str,
    attempt: u32,
}

impl Backoff {
    /// リトライ可能なら待機して Ok、そうでなければ昇格したエラーを返す
    pub async fn retry(&mut self, err: ScraperError) -> Result<(), ScraperError> {
        self.attempt += 1;
        if !err.is_retryable() || self.attempt >= self.policy.max_attempts {
            return Err(err.escalate(self.action, self.attempt));
        }

        let backoff = self.policy.initial_backoff * 2u32.pow(self.attempt - 1);
        warn!(
            "{} attempt {} failed, retrying in {:?}: {}",
            self.action, self.attempt, backoff, err
        );
        sleep(backoff).await;
        Ok(())
    }
}
