//! 週単位の走査（ステートマシン）
//!
//! ```text
//! Init -> LoadingWeek -> Extracting -> Advancing -> LoadingWeek -> ...
//!              |  ^          |
//!              v  |          |
//!             Paused <-------+
//! ```
//!
//! Paused からは必ず LoadingWeek に戻り、週を再入力して表示中の週を確かめてから抽出する。
//!
//! 終了状態は `Done`（今週に到達 / 空の週が連続）と `Failed`（構造エラー）。
//! 抽出した明細は週ごとに即座に出力先へ追記するため、中断しても完了済みの週は失われない。

use chrono::{Datelike, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::challenge::{ChallengeDetector, ChallengeStatus};
use crate::config::{DelayRange, ScraperConfig};
use crate::driver::UiDriver;
use crate::error::ScraperError;
use crate::extractor::{RecordWarning, TripExtractor, WeekOutcome};
use crate::operator::Operator;
use crate::retry::RetryPolicy;
use crate::sink::RecordSink;
use crate::week::{
    is_current_or_future_week, next_window, parse_loose_date_in_year, WeekWindow, RANGE_DASH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// 次の週が今週以降になった
    ReachedPresent,
    /// 空の週が規定数連続した
    ExhaustedHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Init,
    LoadingWeek,
    Extracting,
    Paused,
    Advancing,
    Done(DoneReason),
    Failed,
}

impl NavState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NavState::Done(_) | NavState::Failed)
    }
}

/// 走査の進行状態（ナビゲーターのみが保持し、永続化しない）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalState {
    pub current: WeekWindow,
    pub consecutive_empty_weeks: u32,
}

/// 実行結果
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: DoneReason,
    pub last_completed: Option<WeekWindow>,
    pub weeks_visited: u32,
    pub records_written: usize,
    pub pauses: u32,
    pub warnings: Vec<RecordWarning>,
}

pub struct WeekNavigator<D, O, S> {
    driver: D,
    detector: ChallengeDetector<O>,
    extractor: TripExtractor,
    sink: S,
    retry: RetryPolicy,
    settle_delay: DelayRange,
    week_delay: DelayRange,
    max_empty_weeks: u32,
    today: NaiveDate,
    state: NavState,
    traversal: TraversalState,
    last_completed: Option<WeekWindow>,
    weeks_visited: u32,
    records_written: usize,
    pauses: u32,
    warnings: Vec<RecordWarning>,
}

impl<D, O, S> WeekNavigator<D, O, S>
where
    D: UiDriver,
    O: Operator,
    S: RecordSink,
{
    pub fn new(
        driver: D,
        operator: O,
        sink: S,
        config: &ScraperConfig,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        Self {
            driver,
            detector: ChallengeDetector::new(operator, config.retry, config.resume_delay),
            extractor: TripExtractor::new(config.retry, config.action_delay),
            sink,
            retry: config.retry,
            settle_delay: config.action_delay,
            week_delay: config.week_delay,
            max_empty_weeks: config.max_empty_weeks,
            today,
            state: NavState::Init,
            traversal: TraversalState {
                current: WeekWindow::containing(start),
                consecutive_empty_weeks: 0,
            },
            last_completed: None,
            weeks_visited: 0,
            records_written: 0,
            pauses: 0,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn traversal(&self) -> &TraversalState {
        &self.traversal
    }

    pub fn last_completed(&self) -> Option<WeekWindow> {
        self.last_completed
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// 終了状態まで走査する
    pub async fn run(&mut self) -> Result<RunSummary, ScraperError> {
        loop {
            if let NavState::Done(outcome) = self.step().await? {
                info!(
                    "Traversal done ({:?}): {} weeks, {} rides written, {} warnings",
                    outcome,
                    self.weeks_visited,
                    self.records_written,
                    self.warnings.len()
                );
                return Ok(RunSummary {
                    outcome,
                    last_completed: self.last_completed,
                    weeks_visited: self.weeks_visited,
                    records_written: self.records_written,
                    pauses: self.pauses,
                    warnings: std::mem::take(&mut self.warnings),
                });
            }
        }
    }

    /// 1回だけ状態遷移する
    pub async fn step(&mut self) -> Result<NavState, ScraperError> {
        let result = match self.state {
            NavState::Init => Ok(self.init()),
            NavState::LoadingWeek => self.load_week().await,
            NavState::Paused => self.resume().await,
            NavState::Extracting => self.extract().await,
            NavState::Advancing => Ok(self.advance().await),
            NavState::Done(_) => return Ok(self.state),
            NavState::Failed => {
                return Err(ScraperError::Structural(
                    "navigator already failed".to_string(),
                ))
            }
        };

        match result {
            Ok(next) => {
                debug!("{:?} -> {:?}", self.state, next);
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                error!(
                    "Traversal failed in {:?} at week {}: {}",
                    self.state, self.traversal.current, e
                );
                self.state = NavState::Failed;
                match self.last_completed {
                    Some(week) => error!("Last completed week: {} (restart from the week after)", week),
                    None => error!("No week was completed"),
                }
                Err(ScraperError::Halted {
                    last_completed: self.last_completed,
                    source: Box::new(e),
                })
            }
        }
    }

    fn init(&mut self) -> NavState {
        let window = self.traversal.current;
        info!("Starting from week {}", window);
        if is_current_or_future_week(&window, self.today) {
            info!("Start week is the current week or later, nothing to do");
            return NavState::Done(DoneReason::ReachedPresent);
        }
        NavState::LoadingWeek
    }

    async fn load_week(&mut self) -> Result<NavState, ScraperError> {
        let window = self.traversal.current;
        let label = window.search_label();
        info!("--- Week {}: {} ---", self.weeks_visited + 1, label);

        self.submit(&label).await?;

        if self.detector.check(&mut self.driver).await? == ChallengeStatus::ChallengePending {
            warn!("Security check shown after loading {}", label);
            return Ok(NavState::Paused);
        }

        self.validate_loaded(&window).await?;
        Ok(NavState::Extracting)
    }

    /// ダッシュボードを開き直して週検索欄に期間を入力
    async fn submit(&mut self, label: &str) -> Result<(), ScraperError> {
        let mut backoff = self.retry.start("open dashboard");
        loop {
            match self.driver.open_dashboard().await {
                Ok(()) => break,
                Err(e) => backoff.retry(e).await?,
            }
        }

        let mut backoff = self.retry.start("submit week range");
        loop {
            match self.driver.submit_week_range(label).await {
                Ok(()) => break,
                Err(e) => backoff.retry(e).await?,
            }
        }

        self.settle_delay.wait().await;
        Ok(())
    }

    /// 表示中の週が目的の週であることを確認（違う・表示がなければ再入力）
    async fn validate_loaded(&mut self, window: &WeekWindow) -> Result<(), ScraperError> {
        let label = window.search_label();
        for attempt in 1..=self.retry.max_attempts {
            match self.driver.displayed_week().await? {
                Some(shown) if shows_week(&shown, window) => return Ok(()),
                Some(shown) => warn!(
                    "Dashboard shows {:?} instead of {:?} (attempt {})",
                    shown, label, attempt
                ),
                // ログイン画面やトップに戻された場合
                None => warn!("Dashboard shows no week (attempt {})", attempt),
            }
            if attempt < self.retry.max_attempts {
                self.submit(&label).await?;
            }
        }
        Err(ScraperError::Structural(format!(
            "dashboard did not load week {} after {} attempts",
            label, self.retry.max_attempts
        )))
    }

    async fn resume(&mut self) -> Result<NavState, ScraperError> {
        self.pauses += 1;
        self.detector.wait_for_clear(&mut self.driver).await?;
        info!("Resuming, reloading week {}", self.traversal.current);
        Ok(NavState::LoadingWeek)
    }

    async fn extract(&mut self) -> Result<NavState, ScraperError> {
        let window = self.traversal.current;
        let harvest = match self
            .extractor
            .extract_week(&mut self.driver, &self.detector, &window)
            .await?
        {
            WeekOutcome::Harvested(harvest) => harvest,
            // チャレンジで画面が戻っている可能性があるので、解除後に週を読み込み直す
            WeekOutcome::ChallengeInterrupted => return Ok(NavState::Paused),
        };
        self.weeks_visited += 1;
        self.warnings.extend(harvest.warnings);

        if harvest.records.is_empty() {
            self.traversal.consecutive_empty_weeks += 1;
            self.last_completed = Some(window);
            info!(
                "No rides in week {} ({} empty in a row)",
                window, self.traversal.consecutive_empty_weeks
            );
            if self.traversal.consecutive_empty_weeks >= self.max_empty_weeks {
                info!("{} empty weeks in a row, stopping", self.max_empty_weeks);
                return Ok(NavState::Done(DoneReason::ExhaustedHistory));
            }
            return Ok(NavState::Advancing);
        }

        self.traversal.consecutive_empty_weeks = 0;
        self.sink.append(&harvest.records)?;
        self.records_written += harvest.records.len();
        self.last_completed = Some(window);
        info!(
            "Saved {} rides for week {} (total {})",
            harvest.records.len(),
            window,
            self.records_written
        );
        Ok(NavState::Advancing)
    }

    async fn advance(&mut self) -> NavState {
        let next = next_window(&self.traversal.current);
        if is_current_or_future_week(&next, self.today) {
            info!("Next week {} is the current week or later, stopping", next);
            return NavState::Done(DoneReason::ReachedPresent);
        }
        self.traversal.current = next;
        self.week_delay.wait().await;
        NavState::LoadingWeek
    }
}

/// 表示文字列が週を指しているか（記号・空白の違いは無視、年の省略は許す）
fn shows_week(shown: &str, window: &WeekWindow) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    if normalize(shown) == normalize(&window.search_label()) {
        return true;
    }
    shown
        .split_once([RANGE_DASH, '-'])
        .and_then(|(first, _)| parse_loose_date_in_year(first.trim(), window.start().year()).ok())
        .map_or(false, |start| start == window.start())
}
