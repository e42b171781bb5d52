//! セキュリティチェック（チャレンジ）の検出と人手による解除待ち
//!
//! チャレンジ表示中は自動操作を一切行わない。解除は必ずオペレーターが行う。

use tracing::{info, warn};

use crate::config::DelayRange;
use crate::driver::UiDriver;
use crate::error::ScraperError;
use crate::operator::Operator;
use crate::retry::RetryPolicy;

const CHALLENGE_PROMPT: &str = "SECURITY CHECK DETECTED!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Ready,
    ChallengePending,
}

pub struct ChallengeDetector<O> {
    operator: O,
    retry: RetryPolicy,
    resume_delay: DelayRange,
}

impl<O: Operator> ChallengeDetector<O> {
    pub fn new(operator: O, retry: RetryPolicy, resume_delay: DelayRange) -> Self {
        Self {
            operator,
            retry,
            resume_delay,
        }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// 現在のUI状態を判定
    pub async fn check<D: UiDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<ChallengeStatus, ScraperError> {
        let mut backoff = self.retry.start("challenge check");
        let shown = loop {
            match driver.challenge_shown().await {
                Ok(shown) => break shown,
                Err(e) => backoff.retry(e).await?,
            }
        };

        Ok(if shown {
            ChallengeStatus::ChallengePending
        } else {
            ChallengeStatus::Ready
        })
    }

    /// オペレーターがチャレンジを解除するまでブロック
    ///
    /// 再開の合図の後もチャレンジが残っていれば、再度オペレーターに依頼する。
    pub async fn wait_for_clear<D: UiDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<(), ScraperError> {
        let mut rounds = 0u32;
        loop {
            rounds += 1;
            info!("Waiting for operator to clear security check (round {})", rounds);
            self.operator.await_resume(CHALLENGE_PROMPT).await?;
            self.resume_delay.wait().await;

            match self.check(driver).await? {
                ChallengeStatus::Ready => {
                    info!("Security check cleared");
                    return Ok(());
                }
                ChallengeStatus::ChallengePending => {
                    warn!("Security check still shown after resume");
                }
            }
        }
    }

    /// チャレンジが出ていれば解除を待つ。待った場合は true
    pub async fn gate<D: UiDriver + ?Sized>(&self, driver: &mut D) -> Result<bool, ScraperError> {
        match self.check(driver).await? {
            ChallengeStatus::Ready => Ok(false),
            ChallengeStatus::ChallengePending => {
                self.wait_for_clear(driver).await?;
                Ok(true)
            }
        }
    }
}
