//! 週次スクレイパーの実行
//!
//! 実行方法:
//! ```
//! cargo run --example earnings_run -- ./rides.csv
//! ```
//!
//! ブラウザプロファイル（PROFILE_DIR、既定 ./browser_profile）で事前にログインしておくこと。
//! START_DATE を設定しない場合はコンソールで開始日を尋ねる。

use earnings_scraper::{EarningsService, RunRequest, ScraperError};
use tower::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ログ設定
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./rides.csv".to_string());
    let profile = std::env::var("PROFILE_DIR").unwrap_or_else(|_| "./browser_profile".into());
    let headless = std::env::var("HEADLESS").map(|v| v == "1").unwrap_or(false);

    println!("=== Earnings Weekly Scraper ===");
    println!("Output: {}", output);
    println!("Profile: {}", profile);
    println!("Headless: {}", headless);
    println!();

    let mut request = RunRequest::new(&output)
        .with_user_data_dir(profile)
        .with_headless(headless)
        .with_debug(std::env::var("DEBUG").is_ok());
    if let Ok(start) = std::env::var("START_DATE") {
        request = request.with_start_date(start);
    }

    let mut service = EarningsService::new();
    match service.call(request).await {
        Ok(summary) => {
            println!();
            println!("=== Results ===");
            println!("Outcome: {:?}", summary.outcome);
            println!("Weeks visited: {}", summary.weeks_visited);
            println!("Rides written: {}", summary.records_written);
            println!("Security checks: {}", summary.pauses);
            if let Some(week) = summary.last_completed {
                println!("Last completed week: {}", week);
            }
            if !summary.warnings.is_empty() {
                println!();
                println!("Skipped rides ({}):", summary.warnings.len());
                for warning in &summary.warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Err(ScraperError::Halted {
            last_completed,
            source,
        }) => {
            println!();
            println!("=== Halted ===");
            println!("Reason: {}", source);
            match last_completed {
                Some(week) => println!("Restart from the week after {}", week),
                None => println!("No week was completed"),
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
