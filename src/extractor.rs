//! 週ごとの乗車明細の抽出
//!
//! 1件の明細が解析できなくても週全体は中断しない。警告として記録して次へ進む。

use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::challenge::{ChallengeDetector, ChallengeStatus};
use crate::config::DelayRange;
use crate::driver::{RideEntry, UiDriver};
use crate::error::ScraperError;
use crate::operator::Operator;
use crate::record::{FareField, FareFields, Money, RideRecord};
use crate::retry::RetryPolicy;
use crate::week::{parse_loose_date_in_year, WeekWindow};

/// 手動確認が必要な明細
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWarning {
    pub entry_id: String,
    /// 一覧に表示されていた概要（明細が読めなかった場合の手掛かり）
    pub summary: String,
    pub date: Option<String>,
    pub time: Option<String>,
    pub city: Option<String>,
    pub reason: String,
}

impl RecordWarning {
    fn new(entry: &RideEntry, fields: Option<&FareFields>, reason: String) -> Self {
        let get = |field: FareField| fields.and_then(|f| f.get(field)).map(str::to_string);
        let city = get(FareField::City)
            .or_else(|| get(FareField::Pickup).and_then(|p| city_from_address(&p)));
        Self {
            entry_id: entry.id.clone(),
            summary: entry.summary.clone(),
            date: get(FareField::Date),
            time: get(FareField::Time),
            city,
            reason,
        }
    }
}

impl fmt::Display for RecordWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.date.is_none() && self.time.is_none() && !self.summary.is_empty() {
            return write!(f, "\"{}\" ({}): {}", self.summary, self.entry_id, self.reason);
        }
        let unknown = "?";
        write!(
            f,
            "{} {} {} ({}): {}",
            self.date.as_deref().unwrap_or(unknown),
            self.time.as_deref().unwrap_or(unknown),
            self.city.as_deref().unwrap_or(unknown),
            self.entry_id,
            self.reason
        )
    }
}

/// 1週間分の抽出結果
#[derive(Debug, Default)]
pub struct WeekHarvest {
    pub records: Vec<RideRecord>,
    pub warnings: Vec<RecordWarning>,
}

/// 週の抽出の結末
#[derive(Debug)]
pub enum WeekOutcome {
    Harvested(WeekHarvest),
    /// 一覧の展開中にチャレンジが出た。週を読み込み直す必要がある
    ChallengeInterrupted,
}

pub struct TripExtractor {
    retry: RetryPolicy,
    action_delay: DelayRange,
}

impl TripExtractor {
    pub fn new(retry: RetryPolicy, action_delay: DelayRange) -> Self {
        Self {
            retry,
            action_delay,
        }
    }

    /// 読み込み済みの週から明細を抽出（表示順を維持）
    ///
    /// 1件ごとの失敗は警告として記録し、週全体のエラーにはしない。
    /// エラーになるのは一覧を取得できない場合とオペレーターとのやり取りに失敗した場合のみ。
    pub async fn extract_week<D, O>(
        &self,
        driver: &mut D,
        detector: &ChallengeDetector<O>,
        window: &WeekWindow,
    ) -> Result<WeekOutcome, ScraperError>
    where
        D: UiDriver + ?Sized,
        O: Operator,
    {
        let entries = {
            let mut backoff = self.retry.start("list rides");
            loop {
                match driver.ride_entries().await {
                    Ok(entries) => break entries,
                    Err(ScraperError::ChallengeShown) => {
                        warn!("Security check shown while listing rides of week {}", window);
                        return Ok(WeekOutcome::ChallengeInterrupted);
                    }
                    Err(e) => backoff.retry(e).await?,
                }
            }
        };
        info!("Week {}: found {} rides", window, entries.len());

        let mut harvest = WeekHarvest::default();

        for (i, entry) in entries.iter().enumerate() {
            debug!("Scraping ride {}/{}: {}", i + 1, entries.len(), entry.id);
            detector.gate(driver).await?;

            let fields = match self.visit(driver, detector, entry).await? {
                Ok(fields) => fields,
                Err(e) => {
                    let warning = RecordWarning::new(entry, None, e.to_string());
                    warn!("Skipping ride: {}", warning);
                    harvest.warnings.push(warning);
                    continue;
                }
            };

            match parse_ride(&fields, window) {
                Ok(record) => harvest.records.push(record),
                Err(e) => {
                    let warning = RecordWarning::new(entry, Some(&fields), e.to_string());
                    warn!("Skipping ride: {}", warning);
                    harvest.warnings.push(warning);
                }
            }

            self.action_delay.wait().await;
        }

        Ok(WeekOutcome::Harvested(harvest))
    }

    /// 明細画面を開いて項目を読み、一覧へ戻る
    ///
    /// 外側の Err はオペレーター側の失敗（走査を止める）、内側の Err はこの明細だけの失敗。
    async fn visit<D, O>(
        &self,
        driver: &mut D,
        detector: &ChallengeDetector<O>,
        entry: &RideEntry,
    ) -> Result<Result<FareFields, ScraperError>, ScraperError>
    where
        D: UiDriver + ?Sized,
        O: Operator,
    {
        // 開いた先がチャレンジなら、解除後に同じ明細を開き直す
        loop {
            if let Err(e) = self.open(driver, entry).await {
                return Ok(Err(e));
            }
            match detector.check(driver).await {
                Ok(ChallengeStatus::Ready) => break,
                Ok(ChallengeStatus::ChallengePending) => {
                    warn!("Security check shown on ride {}", entry.id);
                    detector.wait_for_clear(driver).await?;
                }
                Err(e) => return Ok(Err(e)),
            }
        }

        let fields = {
            let mut backoff = self.retry.start("read fare breakdown");
            loop {
                match driver.read_fare_fields().await {
                    Ok(fields) => break Ok(fields),
                    Err(e) => {
                        if let Err(e) = backoff.retry(e).await {
                            break Err(e);
                        }
                    }
                }
            }
        };

        if let Err(e) = driver.close_ride().await {
            debug!("Failed to close ride {}: {}", entry.id, e);
        }
        Ok(fields)
    }

    async fn open<D: UiDriver + ?Sized>(
        &self,
        driver: &mut D,
        entry: &RideEntry,
    ) -> Result<(), ScraperError> {
        let mut backoff = self.retry.start("open ride");
        loop {
            match driver.open_ride(entry).await {
                Ok(()) => return Ok(()),
                Err(e) => backoff.retry(e).await?,
            }
        }
    }
}

/// 明細項目を RideRecord に変換
pub fn parse_ride(fields: &FareFields, window: &WeekWindow) -> Result<RideRecord, ScraperError> {
    let date_text = required(fields, FareField::Date)?;
    let date = resolve_ride_date(date_text, window)?;
    let time = required(fields, FareField::Time)?.to_string();

    let total_earnings = money(fields, FareField::TotalEarnings)?
        .ok_or_else(|| missing(FareField::TotalEarnings))?;

    let pickup = text(fields, FareField::Pickup);
    let city = fields
        .get(FareField::City)
        .map(str::to_string)
        .or_else(|| city_from_address(&pickup))
        .unwrap_or_default();

    let distance_miles = fields
        .get(FareField::Distance)
        .map(|raw| parse_distance(raw).ok_or_else(|| malformed(FareField::Distance, raw)))
        .transpose()?;
    let duration_minutes = fields
        .get(FareField::Duration)
        .map(|raw| parse_duration(raw).ok_or_else(|| malformed(FareField::Duration, raw)))
        .transpose()?;

    let points = match fields.get(FareField::Points) {
        Some(raw) => parse_points(raw).ok_or_else(|| malformed(FareField::Points, raw))?,
        None => 0,
    };

    Ok(RideRecord {
        date,
        time,
        ride_type: text(fields, FareField::RideType),
        distance_pay: money(fields, FareField::DistancePay)?,
        time_pay: money(fields, FareField::TimePay)?,
        surge: money(fields, FareField::Surge)?,
        promotion: money(fields, FareField::Promotion)?,
        base_fare: money(fields, FareField::BaseFare)?,
        fare_subtotal: money(fields, FareField::FareSubtotal)?,
        tip: money(fields, FareField::Tip)?,
        minimum_fare_supplement: money(fields, FareField::MinimumFareSupplement)?,
        wait_time_pay: money(fields, FareField::WaitTimePay)?,
        region_fee: money(fields, FareField::RegionFee)?,
        airport_fee: money(fields, FareField::AirportFee)?,
        insurance_fee: money(fields, FareField::InsuranceFee)?,
        service_fee: money(fields, FareField::ServiceFee)?,
        total_earnings: Some(total_earnings),
        customer_fare: money(fields, FareField::CustomerFare)?,
        points,
        city,
        pickup,
        dropoff: text(fields, FareField::Dropoff),
        per_mile: distance_miles.and_then(|d| total_earnings.per_unit(d)),
        per_minute: duration_minutes.and_then(|d| total_earnings.per_unit(d)),
        distance_miles,
        duration_minutes,
    })
}

fn missing(field: FareField) -> ScraperError {
    ScraperError::RecordParse(format!("missing {}", field.key()))
}

fn malformed(field: FareField, raw: &str) -> ScraperError {
    ScraperError::RecordParse(format!("malformed {}: {:?}", field.key(), raw))
}

fn required(fields: &FareFields, field: FareField) -> Result<&str, ScraperError> {
    fields.get(field).ok_or_else(|| missing(field))
}

fn text(fields: &FareFields, field: FareField) -> String {
    fields.get(field).unwrap_or_default().to_string()
}

/// 項目なしは None、解釈できない金額はエラー（0円扱いにはしない）
fn money(fields: &FareFields, field: FareField) -> Result<Option<Money>, ScraperError> {
    match fields.get(field) {
        None => Ok(None),
        Some(raw) => Money::parse(raw)
            .map(Some)
            .ok_or_else(|| malformed(field, raw)),
    }
}

/// 年のない日付は週ウィンドウの年で補う（年をまたぐ週は終端側の年も試す）
fn resolve_ride_date(text: &str, window: &WeekWindow) -> Result<NaiveDate, ScraperError> {
    let in_window = |d: &NaiveDate| *d >= window.start() && *d <= window.end();

    let date = parse_loose_date_in_year(text, window.start().year())
        .map_err(|_| malformed(FareField::Date, text))?;
    if in_window(&date) || window.start().year() == window.end().year() {
        return Ok(date);
    }
    match parse_loose_date_in_year(text, window.end().year()) {
        Ok(alt) if in_window(&alt) => Ok(alt),
        _ => Ok(date),
    }
}

/// `Portland` from `100 Main St, Portland, OR, US`
pub fn city_from_address(address: &str) -> Option<String> {
    static CITY: OnceLock<Regex> = OnceLock::new();
    let re = CITY.get_or_init(|| {
        Regex::new(r",\s*([^,]+),\s*[A-Z]{2}(?:\s+\d{5})?,\s*US").expect("valid city regex")
    });
    re.captures(address)
        .map(|c| c[1].trim().to_string())
        .filter(|c| !c.is_empty())
}

/// `3.2 mi` / `3.2 miles` / `3.2`
fn parse_distance(raw: &str) -> Option<f64> {
    static DISTANCE: OnceLock<Regex> = OnceLock::new();
    let re = DISTANCE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)\s*(?:mi|miles?)?$").expect("valid distance regex")
    });
    re.captures(raw.trim())?[1].parse().ok()
}

/// `12 min 30 sec` / `1 hr 5 min` / `12.5` (分、小数2桁に丸める)
fn parse_duration(raw: &str) -> Option<f64> {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    let raw = raw.trim();
    if let Ok(minutes) = raw.parse::<f64>() {
        return (minutes >= 0.0).then(|| round2(minutes));
    }

    let re = DURATION.get_or_init(|| {
        Regex::new(
            r"^(?:(\d+)\s*(?:h|hr|hrs|hours?)\s*)?(?:(\d+)\s*(?:m|min|mins|minutes?)\s*)?(?:(\d+)\s*(?:s|sec|secs|seconds?))?$",
        )
        .expect("valid duration regex")
    });
    let caps = re.captures(raw)?;
    if caps.iter().skip(1).all(|g| g.is_none()) {
        return None;
    }
    let part = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    Some(round2(part(1) * 60.0 + part(2) + part(3) / 60.0))
}

/// `3 points earned` / `3`
fn parse_points(raw: &str) -> Option<u32> {
    static POINTS: OnceLock<Regex> = OnceLock::new();
    let re = POINTS.get_or_init(|| {
        Regex::new(r"^(\d+)(?:\s*points?(?:\s*earned)?)?$").expect("valid points regex")
    });
    re.captures(raw.trim())?[1].parse().ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{valid_ride, Event, FakeDriver, FakeOperator, FakeWeek};
    use std::time::Duration;

    fn window() -> WeekWindow {
        WeekWindow::containing(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap())
    }

    fn extractor() -> TripExtractor {
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        };
        TripExtractor::new(retry, DelayRange::ZERO)
    }

    fn detector(driver: &FakeDriver) -> ChallengeDetector<FakeOperator> {
        ChallengeDetector::new(
            FakeOperator::new(driver.log()),
            RetryPolicy::default(),
            DelayRange::ZERO,
        )
    }

    #[test]
    fn test_parse_valid_ride() {
        let record = parse_ride(&valid_ride(0), &window()).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 7, 2).unwrap());
        assert_eq!(record.ride_type, "UberX");
        assert_eq!(record.total_earnings, Some(Money::from_cents(750)));
        assert_eq!(record.region_fee, Some(Money::from_cents(75)));
        assert_eq!(record.surge, None);
        assert_eq!(record.points, 2);
        assert_eq!(record.city, "Portland");
        assert_eq!(record.distance_miles, Some(3.0));
        assert_eq!(record.duration_minutes, Some(12.5));
        assert_eq!(record.per_mile, Some(Money::from_cents(250)));
        assert_eq!(record.per_minute, Some(Money::from_cents(60)));
    }

    #[test]
    fn test_malformed_amount_is_rejected_not_zeroed() {
        let fields = valid_ride(0).with(FareField::Tip, "$abc");
        let err = parse_ride(&fields, &window()).unwrap_err();
        assert!(matches!(err, ScraperError::RecordParse(msg) if msg.contains("tip")));
    }

    #[test]
    fn test_missing_total_earnings_is_rejected() {
        let fields = valid_ride(0).with(FareField::TotalEarnings, "");
        assert!(parse_ride(&fields, &window()).is_err());
    }

    #[test]
    fn test_yearless_date_resolves_across_new_year() {
        let window = WeekWindow::containing(NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        let fields = valid_ride(0).with(FareField::Date, "Jan 2");
        let record = parse_ride(&fields, &window).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    }

    #[test]
    fn test_duration_and_distance_formats() {
        assert_eq!(parse_duration("1 hr 5 min"), Some(65.0));
        assert_eq!(parse_duration("45 sec"), Some(0.75));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_distance("12.25 miles"), Some(12.25));
        assert_eq!(parse_distance("far"), None);
        assert_eq!(parse_points("1 point earned"), Some(1));
    }

    #[test]
    fn test_city_from_address() {
        assert_eq!(
            city_from_address("9 Elm St, Beaverton, OR 97005, US").as_deref(),
            Some("Beaverton")
        );
        assert_eq!(city_from_address("Airport"), None);
    }

    async fn harvest_week(driver: &mut FakeDriver) -> WeekHarvest {
        let detector = detector(driver);
        match extractor()
            .extract_week(driver, &detector, &window())
            .await
            .unwrap()
        {
            WeekOutcome::Harvested(harvest) => harvest,
            WeekOutcome::ChallengeInterrupted => panic!("unexpected challenge interrupt"),
        }
    }

    async fn loaded(week: FakeWeek) -> FakeDriver {
        let mut driver = FakeDriver::new(vec![week]);
        driver.submit_week_range(&window().search_label()).await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped_with_warning() {
        let week = FakeWeek::rides(2)
            .with_ride(valid_ride(2).with(FareField::FareSubtotal, "$5.5.0"))
            .with_ride(valid_ride(3));
        let mut driver = loaded(week).await;

        let harvest = harvest_week(&mut driver).await;

        assert_eq!(harvest.records.len(), 3);
        let expected: Vec<RideRecord> = [0, 1, 3]
            .iter()
            .map(|&n| parse_ride(&valid_ride(n), &window()).unwrap())
            .collect();
        assert_eq!(harvest.records, expected);

        assert_eq!(harvest.warnings.len(), 1);
        let warning = &harvest.warnings[0];
        assert_eq!(warning.entry_id, "week0-ride2");
        assert_eq!(warning.city.as_deref(), Some("Portland"));
        assert!(warning.reason.contains("fare_subtotal"));
        assert!(warning.to_string().starts_with("Jul 2, 2024 3:15 PM Portland"));
    }

    #[tokio::test]
    async fn test_unreachable_entry_is_skipped() {
        let mut driver = loaded(FakeWeek::rides(3)).await;
        driver.fail_ride("week0-ride1");

        let harvest = harvest_week(&mut driver).await;

        assert_eq!(harvest.records.len(), 2);
        assert_eq!(harvest.warnings.len(), 1);
        let opens = driver
            .events()
            .iter()
            .filter(|e| **e == Event::OpenRide("week0-ride1".into()))
            .count();
        assert_eq!(opens, 2);
        // 明細が読めないので一覧の概要で識別する
        let warning = harvest.warnings[0].to_string();
        assert!(warning.starts_with("\"ride 1\" (week0-ride1)"), "{}", warning);
    }

    #[tokio::test]
    async fn test_week_with_no_openable_rides_is_only_warned() {
        let mut driver = loaded(FakeWeek::rides(1)).await;
        driver.fail_ride("week0-ride0");

        let harvest = harvest_week(&mut driver).await;

        assert!(harvest.records.is_empty());
        assert_eq!(harvest.warnings.len(), 1);
        assert_eq!(harvest.warnings[0].entry_id, "week0-ride0");
    }

    #[tokio::test]
    async fn test_challenge_between_rides_waits_for_operator() {
        let mut driver = loaded(FakeWeek::rides(2)).await;
        driver.raise_challenge(1);

        let harvest = harvest_week(&mut driver).await;
        assert_eq!(harvest.records.len(), 2);

        let events = driver.events();
        let resume = events.iter().position(|e| *e == Event::Resume).unwrap();
        let first_open = events
            .iter()
            .position(|e| matches!(e, Event::OpenRide(_)))
            .unwrap();
        assert!(resume < first_open);
    }

    #[tokio::test]
    async fn test_challenge_on_opened_ride_reopens_after_resume() {
        let mut driver = loaded(FakeWeek::rides(3)).await;
        driver.challenge_on_open("week0-ride1");

        let harvest = harvest_week(&mut driver).await;
        assert_eq!(harvest.records.len(), 3);
        assert!(harvest.warnings.is_empty());

        let events = driver.events();
        let ride1 = Event::OpenRide("week0-ride1".into());
        let opens: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == ride1)
            .map(|(i, _)| i)
            .collect();
        let resume = events.iter().position(|e| *e == Event::Resume).unwrap();
        assert_eq!(opens.len(), 2);
        assert!(opens[0] < resume && resume < opens[1]);
        // チャレンジ表示中は読み取りも戻る操作もしない
        assert_eq!(
            &events[opens[0]..=resume],
            &[ride1.clone(), Event::ChallengeCheck(true), Event::Resume]
        );
    }

    #[tokio::test]
    async fn test_challenge_while_listing_interrupts_week() {
        let mut driver = loaded(FakeWeek::rides(2)).await;
        driver.interrupt_listing();
        let detector = detector(&driver);

        let outcome = extractor()
            .extract_week(&mut driver, &detector, &window())
            .await
            .unwrap();
        assert!(matches!(outcome, WeekOutcome::ChallengeInterrupted));

        // 解除待ちと読み直しは週の読み込みからやり直す側の責任
        let events = driver.events();
        assert_eq!(events.iter().filter(|e| **e == Event::ListRides).count(), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Resume | Event::OpenRide(_))));
    }
}
