use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use crate::retry::RetryPolicy;

const DASHBOARD_URL: &str = "https://drivers.uber.com/earnings/activities";
const MAX_EMPTY_WEEKS: u32 = 3;

/// ランダム待機の範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn secs(min: f64, max: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        }
    }

    /// 範囲内の待機時間をランダムに選ぶ
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }

    pub async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// 週検索欄のあるダッシュボードのURL
    pub dashboard_url: String,
    /// 出力CSV（追記専用）
    pub output_path: PathBuf,
    /// ログイン済みセッションを保持するブラウザプロファイル（呼び出し側が管理）
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub debug: bool,
    pub timeout: Duration,
    /// 週と週の間の待機
    pub week_delay: DelayRange,
    /// クリックなど個々の操作後の待機
    pub action_delay: DelayRange,
    /// セキュリティチェック解除後の待機
    pub resume_delay: DelayRange,
    /// 連続で空の週がこの数に達したら終了
    pub max_empty_weeks: u32,
    pub retry: RetryPolicy,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            dashboard_url: DASHBOARD_URL.to_string(),
            output_path: PathBuf::from("./rides.csv"),
            user_data_dir: PathBuf::from("./browser_profile"),
            headless: false,
            debug: false,
            timeout: Duration::from_secs(60),
            week_delay: DelayRange::secs(1.0, 2.0),
            action_delay: DelayRange::secs(0.5, 1.5),
            resume_delay: DelayRange::secs(2.0, 4.0),
            max_empty_weeks: MAX_EMPTY_WEEKS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ScraperConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = url.into();
        self
    }

    pub fn with_user_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_data_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// すべての待機を無効化（テスト用）
    pub fn without_delays(mut self) -> Self {
        self.week_delay = DelayRange::ZERO;
        self.action_delay = DelayRange::ZERO;
        self.resume_delay = DelayRange::ZERO;
        self.retry.initial_backoff = Duration::from_millis(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ScraperConfig::new("/tmp/rides.csv")
            .with_headless(true)
            .with_user_data_dir("/tmp/profile")
            .with_timeout(Duration::from_secs(120));

        assert_eq!(config.output_path, PathBuf::from("/tmp/rides.csv"));
        assert_eq!(config.user_data_dir, PathBuf::from("/tmp/profile"));
        assert!(config.headless);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_empty_weeks, 3);
    }

    #[test]
    fn test_delay_sample_within_range() {
        let range = DelayRange::secs(1.0, 3.0);
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= range.min && d <= range.max);
        }
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
    }
}
