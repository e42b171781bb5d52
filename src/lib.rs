//! ドライバー収益ダッシュボードの週次スクレイパー
//!
//! - 開始日を含む週から今週の手前まで、1週ずつダッシュボードを検索
//! - 各週の乗車明細を開いて運賃内訳を読み取り、CSVへ追記
//! - セキュリティチェックが出たら人手の解除を待ってから同じ週をやり直す
//!
//! # 使用例
//!
//! ```rust,ignore
//! use earnings_scraper::{EarningsService, RunRequest};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = EarningsService::new();
//!
//!     let request = RunRequest::new("./rides.csv")
//!         .with_start_date("Jul 1, 2024")
//!         .with_user_data_dir("./browser_profile");
//!
//!     let summary = service.call(request).await.unwrap();
//!     println!("Rides written: {}", summary.records_written);
//! }
//! ```
//!
//! # ドライバーを差し替える場合
//!
//! ```rust,ignore
//! use earnings_scraper::{ConsoleOperator, MemorySink, ScraperConfig, WeekNavigator};
//!
//! let config = ScraperConfig::default();
//! let mut navigator =
//!     WeekNavigator::new(my_driver, ConsoleOperator::new(), MemorySink::new(), &config, start, today);
//! let summary = navigator.run().await?;
//! ```

pub mod challenge;
pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod navigator;
pub mod operator;
pub mod record;
pub mod retry;
pub mod service;
pub mod sink;
pub mod week;

#[cfg(test)]
mod testing;

// 主要な型をリエクスポート
pub use challenge::{ChallengeDetector, ChallengeStatus};
pub use chrome::ChromeDriver;
pub use config::{DelayRange, ScraperConfig};
pub use driver::{RideEntry, UiDriver};
pub use error::ScraperError;
pub use extractor::{RecordWarning, TripExtractor, WeekHarvest, WeekOutcome};
pub use navigator::{DoneReason, NavState, RunSummary, WeekNavigator};
pub use operator::{ConsoleOperator, Operator};
pub use record::{FareField, FareFields, Money, RideRecord, CSV_HEADERS};
pub use retry::RetryPolicy;
pub use service::{open_session, EarningsService, RunRequest};
pub use sink::{CsvSink, MemorySink, RecordSink};
pub use week::WeekWindow;
