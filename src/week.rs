//! 週計算
//!
//! 入力日付の解釈と、月曜始まりの週ウィンドウの計算を行う。
//! 数字のみの日付 (`02/09/2024` など) は常に 月/日/年 として解釈する。

use std::fmt;

use chrono::{Datelike, Duration, Local, NaiveDate};

use crate::error::ScraperError;

/// 月名を含む書式 (chronoの %B は解析時に短縮名も受け付ける)
const MONTH_NAME_FORMATS: &[&str] = &["%B %d, %Y", "%B %d %Y"];

/// 月曜始まりの1週間 (start..=end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl WeekWindow {
    /// 指定日を含む週
    pub fn containing(date: NaiveDate) -> Self {
        let start = week_start(date);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// 週検索欄に入力する文字列 (`Jul 1, 2024 – Jul 8, 2024`)
    ///
    /// ダッシュボードは週を「月曜〜翌週月曜」と表示するため、終端は `end` の翌日になる。
    pub fn search_label(&self) -> String {
        let until = self.end + Duration::days(1);
        format!(
            "{} {} {}",
            self.start.format("%b %-d, %Y"),
            RANGE_DASH,
            until.format("%b %-d, %Y")
        )
    }
}

/// 期間の区切り（en dash）
pub const RANGE_DASH: char = '\u{2013}';

impl fmt::Display for WeekWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.start, RANGE_DASH, self.end)
    }
}

/// 日付を含む週の月曜日
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// 7日後の週
pub fn next_window(window: &WeekWindow) -> WeekWindow {
    WeekWindow::containing(window.start + Duration::days(7))
}

/// 今週以降の週かどうか（走査の終了条件）
pub fn is_current_or_future_week(window: &WeekWindow, today: NaiveDate) -> bool {
    window.start >= week_start(today)
}

/// ゆるい書式の日付を解釈する（年のない入力は今年として扱う）
pub fn parse_loose_date(text: &str) -> Result<NaiveDate, ScraperError> {
    parse_loose_date_in_year(text, Local::now().year())
}

/// ゆるい書式の日付を解釈する
///
/// 受け付ける書式:
/// - `Jul 1, 2024` / `July 1 2024` / `Jul 1` (年なしは `year` を補う)
/// - `2024-07-01`
/// - `07/01/2024` / `07/01/24` / `07-01-2024` (月/日/年)
pub fn parse_loose_date_in_year(text: &str, year: i32) -> Result<NaiveDate, ScraperError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ScraperError::DateParse("empty input".to_string()));
    }

    if text.starts_with(|c: char| c.is_ascii_digit()) {
        return parse_numeric_date(text);
    }

    for fmt in MONTH_NAME_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Ok(date);
        }
    }

    // 年なし (`Jul 1`)
    let with_year = format!("{} {}", text.trim_end_matches(','), year);
    NaiveDate::parse_from_str(&with_year, "%B %d %Y")
        .map_err(|_| ScraperError::DateParse(format!("unrecognized date: {:?}", text)))
}

/// 数字のみの日付 (`2024-07-01` / `07/01/2024` / `07/01/24` / `07-01-2024`)
fn parse_numeric_date(text: &str) -> Result<NaiveDate, ScraperError> {
    let invalid = || ScraperError::DateParse(format!("unrecognized date: {:?}", text));

    let parts: Vec<&str> = text.split(['/', '-']).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return Err(invalid());
    }

    let (y, m, d) = if parts[0].len() == 4 {
        // ISO (年-月-日) はハイフン区切りのみ
        if text.contains('/') {
            return Err(invalid());
        }
        (parts[0], parts[1], parts[2])
    } else {
        (parts[2], parts[0], parts[1])
    };

    let year: i32 = match y.len() {
        4 => y.parse().map_err(|_| invalid())?,
        2 => 2000 + y.parse::<i32>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    let month: u32 = m.parse().map_err(|_| invalid())?;
    let day: u32 = d.parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}
