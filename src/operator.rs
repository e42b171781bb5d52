//! オペレーター（人間）とのやり取り
//!
//! 開始日の入力と、セキュリティチェック解除後の再開合図の2つだけを扱う。

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tokio::io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ScraperError;
use crate::week::parse_loose_date_in_year;

#[async_trait]
pub trait Operator: Send + Sync {
    /// 開始日の入力を受け取る
    async fn read_start_date(&self) -> Result<String, ScraperError>;

    /// 再開の合図があるまでブロックする（タイムアウトなし）
    async fn await_resume(&self, prompt: &str) -> Result<(), ScraperError>;
}

/// 標準入力を使うオペレーター
pub struct ConsoleOperator {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(stdin()).lines()),
        }
    }

    async fn read_line(&self) -> Result<String, ScraperError> {
        let mut lines = self.lines.lock().await;
        lines
            .next_line()
            .await?
            .ok_or_else(|| ScraperError::Operator("stdin closed".to_string()))
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn read_start_date(&self) -> Result<String, ScraperError> {
        println!("Enter start date (e.g. Jul 1, 2024 or 07/01/2024, month first) or Enter for today:");
        self.read_line().await
    }

    async fn await_resume(&self, prompt: &str) -> Result<(), ScraperError> {
        println!();
        println!("  {}", prompt);
        println!("  Complete the check in the browser, then press Enter...");
        self.read_line().await.map(|_| ())
    }
}

/// オペレーターに開始日を尋ねて解釈する（空入力は今日）
///
/// 解釈できない入力はその場でエラーとなり、走査は開始されない。
pub async fn ask_start_date(
    operator: &dyn Operator,
    today: NaiveDate,
) -> Result<NaiveDate, ScraperError> {
    let input = operator.read_start_date().await?;
    parse_start_date(&input, today)
}

/// 開始日の文字列を解釈する（空は今日、年の省略は今年）
pub fn parse_start_date(input: &str, today: NaiveDate) -> Result<NaiveDate, ScraperError> {
    if input.trim().is_empty() {
        info!("No start date given, starting from today ({})", today);
        return Ok(today);
    }
    parse_loose_date_in_year(input, today.year())
}
