use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{Local, NaiveDate};
use tower::Service;
use tracing::{info, warn};

use crate::chrome::ChromeDriver;
use crate::config::ScraperConfig;
use crate::driver::UiDriver;
use crate::error::ScraperError;
use crate::navigator::{RunSummary, WeekNavigator};
use crate::operator::{ask_start_date, parse_start_date, ConsoleOperator, Operator};
use crate::sink::CsvSink;

const LOGIN_PROMPT: &str = "Log in and complete any security checks in the browser.";

/// ダッシュボードを開き、オペレーターのログイン完了を待ってから開始日を決める
///
/// 開始日が指定済みならその場では尋ねない。
pub async fn open_session<D: UiDriver + ?Sized>(
    driver: &mut D,
    operator: &dyn Operator,
    start_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<NaiveDate, ScraperError> {
    driver.open_dashboard().await?;
    operator.await_resume(LOGIN_PROMPT).await?;
    match start_date {
        Some(date) => Ok(date),
        None => ask_start_date(operator, today).await,
    }
}

/// 走査リクエスト
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// 開始日（None ならコンソールで尋ねる）
    pub start_date: Option<String>,
    pub output_path: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub debug: bool,
}

impl RunRequest {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            start_date: None,
            output_path: output_path.into(),
            user_data_dir: PathBuf::from("./browser_profile"),
            headless: false,
            debug: false,
        }
    }

    pub fn with_start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
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
}

impl From<RunRequest> for ScraperConfig {
    fn from(req: RunRequest) -> Self {
        ScraperConfig::new(req.output_path)
            .with_user_data_dir(req.user_data_dir)
            .with_headless(req.headless)
            .with_debug(req.debug)
    }
}

/// tower::Serviceを実装した週次スクレイパーサービス
#[derive(Debug, Clone, Default)]
pub struct EarningsService {}

impl EarningsService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<RunRequest> for EarningsService {
    type Response = RunSummary;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RunRequest) -> Self::Future {
        info!("Run request received: output={:?}", req.output_path);

        Box::pin(async move {
            let today = Local::now().date_naive();
            let operator = ConsoleOperator::new();
            // 指定された開始日はブラウザ起動前に検証する
            let given_start = req
                .start_date
                .as_deref()
                .map(|text| parse_start_date(text, today))
                .transpose()?;

            let config: ScraperConfig = req.into();
            let sink = CsvSink::new(&config.output_path);
            match sink.existing_rows() {
                Ok(0) => info!("Writing new output {:?}", sink.path()),
                Ok(rows) => info!("Appending to {:?} ({} rows already present)", sink.path(), rows),
                Err(e) => warn!("Could not read existing output {:?}: {}", sink.path(), e),
            }

            let mut driver = ChromeDriver::new(config.clone());
            driver.initialize().await?;
            let start = match open_session(&mut driver, &operator, given_start, today).await {
                Ok(start) => start,
                Err(e) => {
                    driver.close().await?;
                    return Err(e);
                }
            };

            info!("Starting traversal from {}", start);
            let mut navigator = WeekNavigator::new(driver, operator, sink, &config, start, today);
            let result = navigator.run().await;
            navigator.driver_mut().close().await?;

            let summary = result?;
            info!(
                "Run finished: {:?}, {} weeks, {} rides, {} pauses",
                summary.outcome, summary.weeks_visited, summary.records_written, summary.pauses
            );
            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, FakeDriver, FakeOperator, FakeWeek};

    #[test]
    fn test_run_request_builder() {
        let req = RunRequest::new("/tmp/rides.csv")
            .with_start_date("Jul 1, 2024")
            .with_user_data_dir("/tmp/profile")
            .with_headless(true);

        assert_eq!(req.start_date.as_deref(), Some("Jul 1, 2024"));
        assert_eq!(req.output_path, PathBuf::from("/tmp/rides.csv"));
        assert_eq!(req.user_data_dir, PathBuf::from("/tmp/profile"));
        assert!(req.headless);
        assert!(!req.debug);
    }

    #[test]
    fn test_run_request_to_config() {
        let req = RunRequest::new("out.csv").with_debug(true);
        let config: ScraperConfig = req.into();

        assert_eq!(config.output_path, PathBuf::from("out.csv"));
        assert_eq!(config.user_data_dir, PathBuf::from("./browser_profile"));
        assert!(config.debug);
        assert_eq!(config.max_empty_weeks, 3);
    }

    #[tokio::test]
    async fn test_session_waits_for_login_before_start_date() {
        let mut driver = FakeDriver::new(vec![FakeWeek::rides(1)]);
        let operator = FakeOperator::new(driver.log());
        let today = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();

        let start = open_session(&mut driver, &operator, None, today).await.unwrap();

        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(driver.events(), vec![Event::OpenDashboard, Event::Resume]);
    }

    #[tokio::test]
    async fn test_session_keeps_given_start_date() {
        let mut driver = FakeDriver::new(vec![]);
        let operator = FakeOperator::new(driver.log());
        let given = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let start = open_session(&mut driver, &operator, Some(given), given).await.unwrap();
        assert_eq!(start, given);
        assert_eq!(driver.events(), vec![Event::OpenDashboard, Event::Resume]);
    }

    #[tokio::test]
    async fn test_invalid_start_date_fails_before_browser_launch() {
        let mut service = EarningsService::new();
        let req = RunRequest::new("unused.csv").with_start_date("someday");
        let err = service.call(req).await.unwrap_err();
        assert!(matches!(err, ScraperError::DateParse(_)));
    }
}
