//! テスト用のUIドライバー・オペレーター

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::driver::{RideEntry, UiDriver};
use crate::error::ScraperError;
use crate::operator::Operator;
use crate::record::{FareField, FareFields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    OpenDashboard,
    Submit(String),
    ChallengeCheck(bool),
    ListRides,
    OpenRide(String),
    ReadFare,
    CloseRide,
    Resume,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// 古い表示として返す週
pub const STALE_WEEK: &str = "Jan 1, 2001 \u{2013} Jan 8, 2001";

/// 1週間分のダッシュボード内容
#[derive(Debug, Clone, Default)]
pub struct FakeWeek {
    pub rides: Vec<FareFields>,
    /// 初回読み込み時にチャレンジを表示する
    pub challenge_on_load: bool,
}

impl FakeWeek {
    pub fn rides(count: usize) -> Self {
        Self {
            rides: (0..count).map(valid_ride).collect(),
            challenge_on_load: false,
        }
    }

    pub fn with_challenge(mut self) -> Self {
        self.challenge_on_load = true;
        self
    }

    pub fn with_ride(mut self, fields: FareFields) -> Self {
        self.rides.push(fields);
        self
    }
}

/// 正常に解析できる明細
pub fn valid_ride(n: usize) -> FareFields {
    FareFields::new()
        .with(FareField::Date, "Jul 2, 2024")
        .with(FareField::Time, format!("{}:15 PM", n % 12 + 1))
        .with(FareField::RideType, "UberX")
        .with(FareField::DistancePay, "$3.10")
        .with(FareField::TimePay, "$2.40")
        .with(FareField::FareSubtotal, "$5.50")
        .with(FareField::Tip, "$2.00")
        .with(FareField::TotalEarnings, "$7.50")
        .with(FareField::CustomerFare, "$14.20")
        .with(FareField::RegionFee, "-$0.75")
        .with(FareField::Points, "2 points earned")
        .with(FareField::Pickup, "100 Main St, Portland, OR, US")
        .with(FareField::Dropoff, "200 Oak Ave, Portland, OR, US")
        .with(FareField::Distance, "3.00 mi")
        .with(FareField::Duration, "12 min 30 sec")
}

pub struct FakeDriver {
    weeks: Vec<FakeWeek>,
    log: EventLog,
    submitted: Vec<String>,
    current_week: Option<usize>,
    current_ride: Option<FareFields>,
    pending_challenges: u32,
    missing_search_control: bool,
    interrupt_listing: bool,
    failing_rides: HashSet<String>,
    challenged_rides: HashSet<String>,
    stale_displays: u32,
    hide_displayed_week: bool,
}

impl FakeDriver {
    /// `weeks[i]` は i 番目に検索された週の内容
    pub fn new(weeks: Vec<FakeWeek>) -> Self {
        Self {
            weeks,
            log: Arc::new(Mutex::new(Vec::new())),
            submitted: Vec::new(),
            current_week: None,
            current_ride: None,
            pending_challenges: 0,
            missing_search_control: false,
            interrupt_listing: false,
            failing_rides: HashSet::new(),
            challenged_rides: HashSet::new(),
            stale_displays: 0,
            hide_displayed_week: false,
        }
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    /// 週検索欄が消えた状態にする
    pub fn remove_search_control(&mut self) {
        self.missing_search_control = true;
    }

    /// 以降 `count` 回のチェックでチャレンジを表示する
    pub fn raise_challenge(&mut self, count: u32) {
        self.pending_challenges = count;
    }

    /// 次の一覧展開をチャレンジで中断させる（読み込んだ週はリセットされる）
    pub fn interrupt_listing(&mut self) {
        self.interrupt_listing = true;
    }

    /// 指定IDの明細を初めて開いたときはチャレンジ画面になる
    pub fn challenge_on_open(&mut self, id: impl Into<String>) {
        self.challenged_rides.insert(id.into());
    }

    /// 以降 `count` 回の週表示の問い合わせで別の週を返す
    pub fn show_stale_week(&mut self, count: u32) {
        self.stale_displays = count;
    }

    /// 週の期間表示が画面にない状態にする（ログイン画面など）
    pub fn hide_displayed_week(&mut self) {
        self.hide_displayed_week = true;
    }

    /// 指定IDの明細は常に開けない
    pub fn fail_ride(&mut self, id: impl Into<String>) {
        self.failing_rides.insert(id.into());
    }

    /// 検索された週の一覧（重複なし、検索順）
    pub fn submitted_weeks(&self) -> Vec<String> {
        self.submitted.clone()
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

#[async_trait]
impl UiDriver for FakeDriver {
    async fn open_dashboard(&mut self) -> Result<(), ScraperError> {
        self.push(Event::OpenDashboard);
        self.current_week = None;
        Ok(())
    }

    async fn submit_week_range(&mut self, range: &str) -> Result<(), ScraperError> {
        if self.missing_search_control {
            return Err(ScraperError::ElementNotFound("week search input".to_string()));
        }
        self.push(Event::Submit(range.to_string()));

        let index = match self.submitted.iter().position(|r| r == range) {
            Some(index) => index,
            None => {
                self.submitted.push(range.to_string());
                let index = self.submitted.len() - 1;
                if self.weeks.get(index).map(|w| w.challenge_on_load).unwrap_or(false) {
                    self.pending_challenges = 1;
                }
                index
            }
        };
        self.current_week = Some(index);
        Ok(())
    }

    async fn displayed_week(&mut self) -> Result<Option<String>, ScraperError> {
        if self.hide_displayed_week {
            return Ok(None);
        }
        if self.stale_displays > 0 {
            self.stale_displays -= 1;
            return Ok(Some(STALE_WEEK.to_string()));
        }
        Ok(self.current_week.map(|i| self.submitted[i].clone()))
    }

    async fn ride_entries(&mut self) -> Result<Vec<RideEntry>, ScraperError> {
        self.push(Event::ListRides);
        if std::mem::take(&mut self.interrupt_listing) {
            self.current_week = None;
            return Err(ScraperError::ChallengeShown);
        }
        let Some(week) = self.current_week else {
            return Ok(Vec::new());
        };
        let count = self.weeks.get(week).map(|w| w.rides.len()).unwrap_or(0);
        Ok((0..count)
            .map(|i| RideEntry::new(format!("week{}-ride{}", week, i), format!("ride {}", i)))
            .collect())
    }

    async fn open_ride(&mut self, entry: &RideEntry) -> Result<(), ScraperError> {
        self.push(Event::OpenRide(entry.id.clone()));
        if self.failing_rides.contains(&entry.id) {
            return Err(ScraperError::Navigation(format!("{} did not load", entry.id)));
        }
        if self.challenged_rides.remove(&entry.id) {
            self.pending_challenges = 1;
            self.current_ride = None;
            return Ok(());
        }
        let week = self
            .current_week
            .ok_or_else(|| ScraperError::Structural("no week loaded".to_string()))?;
        let index: usize = entry
            .id
            .rsplit("ride")
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ScraperError::ElementNotFound(entry.id.clone()))?;
        self.current_ride = self.weeks[week].rides.get(index).cloned();
        Ok(())
    }

    async fn read_fare_fields(&mut self) -> Result<FareFields, ScraperError> {
        self.push(Event::ReadFare);
        self.current_ride
            .clone()
            .ok_or_else(|| ScraperError::ElementNotFound("fare breakdown".to_string()))
    }

    async fn close_ride(&mut self) -> Result<(), ScraperError> {
        self.push(Event::CloseRide);
        self.current_ride = None;
        Ok(())
    }

    async fn challenge_shown(&mut self) -> Result<bool, ScraperError> {
        let shown = self.pending_challenges > 0;
        if shown {
            self.pending_challenges -= 1;
        }
        self.push(Event::ChallengeCheck(shown));
        Ok(shown)
    }
}

/// 再開の合図を即座に返し、ログに記録するオペレーター
pub struct FakeOperator {
    log: EventLog,
    start_date: String,
}

impl FakeOperator {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            start_date: "Jul 1, 2024".to_string(),
        }
    }
}

#[async_trait]
impl Operator for FakeOperator {
    async fn read_start_date(&self) -> Result<String, ScraperError> {
        Ok(self.start_date.clone())
    }

    async fn await_resume(&self, _prompt: &str) -> Result<(), ScraperError> {
        self.log.lock().unwrap().push(Event::Resume);
        Ok(())
    }
}
