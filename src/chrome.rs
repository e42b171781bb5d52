//! chromiumoxide による UiDriver 実装
//!
//! ログイン状態は `user_data_dir` のブラウザプロファイルに保持される。
//! プロファイルは呼び出し側の持ち物で、このドライバーはログイン処理を行わない。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::driver::{RideEntry, UiDriver};
use crate::error::ScraperError;
use crate::record::FareFields;

/// チャレンジ画面に現れる文言（小文字）
const CHALLENGE_MARKERS: &[&str] = &["security check", "one more step"];

/// 週検索欄の候補
const WEEK_INPUT_SELECTORS: &[&str] = &[
    "input[placeholder*='week' i]",
    "input[aria-label*='week' i]",
    "input[type='search']",
    "input",
];

/// 「さらに読み込む」の上限（無限ループ防止）
const MAX_LOAD_MORE_CLICKS: u32 = 50;

/// ページ安定判定のインターバル（ミリ秒）
const STABLE_CHECK_INTERVAL_MS: u64 = 300;
/// 連続でこの回数同じならページ安定
const REQUIRED_STABLE_CHECKS: u32 = 3;

const DISPLAYED_WEEK_SCRIPT: &str = r#"
(() => {
    const re = /[A-Z][a-z]{2} \d{1,2}(?:, \d{4})?\s*[–-]\s*[A-Z][a-z]{2} \d{1,2}(?:, \d{4})?/;
    const m = document.body ? document.body.innerText.match(re) : null;
    return m ? m[0] : '';
})()
"#;

const CLICK_LOAD_MORE_SCRIPT: &str = r#"
(() => {
    const btn = [...document.querySelectorAll('button')]
        .find(b => /load more/i.test(b.textContent) && b.offsetParent !== null);
    if (btn) { btn.click(); return true; }
    return false;
})()
"#;

const TRIP_LINKS_SCRIPT: &str = r#"
(() => {
    const seen = new Set();
    const out = [];
    for (const a of document.querySelectorAll('a[href*="/earnings/trips/"]')) {
        if (seen.has(a.href)) continue;
        seen.add(a.href);
        out.push({ href: a.href, text: (a.innerText || '').trim().replace(/\s+/g, ' ') });
    }
    return out;
})()
"#;

const EXPAND_FARE_SCRIPT: &str = r#"
(() => {
    const el = [...document.querySelectorAll('button, a, div[role="button"]')]
        .find(e => /view fare breakdown/i.test(e.textContent));
    if (el) { el.click(); return true; }
    return false;
})()
"#;

/// 明細画面の項目を FareField のキー名で返す（該当なしは空文字）
const FARE_FIELDS_SCRIPT: &str = r#"
(() => {
    const out = {};
    const leaves = [...document.querySelectorAll('*')].filter(el => el.children.length === 0);
    const leafText = re => {
        const el = leaves.find(e => re.test(e.textContent.trim()));
        return el ? el.textContent.trim() : '';
    };
    const all = document.body ? document.body.innerText : '';
    const money = '(-?\\$[\\d,]+(?:\\.\\d{1,2})?)';

    const header = document.querySelector('[class*="trip"] span, [class*="list"] span');
    const hm = header ? header.textContent.match(/(.+?)\s*•\s*(.+?)\s*•\s*(.+)/) : null;
    out.ride_type = hm ? hm[1].trim() : '';
    out.date = hm ? hm[2].trim() : '';
    out.time = hm ? hm[3].trim() : '';

    out.duration = leafText(/^\d+\s*min(\s*\d+\s*sec)?$/);
    out.distance = leafText(/^\d+(\.\d+)?\s*mi$/);
    out.points = leafText(/^\d+\s*points?\s*earned$/i);

    const addresses = [...new Set(leaves
        .map(e => e.textContent.trim())
        .filter(t => /, US$/.test(t)))];
    out.pickup = addresses[0] || '';
    out.dropoff = addresses[1] || '';

    const items = [
        ['base_fare', /^Base(?! Fare)/],
        ['distance_pay', /^Distance/],
        ['time_pay', /^Time\b/],
        ['surge', /^Surge/],
        ['promotion', /^Promotion/],
        ['minimum_fare_supplement', /^Minimum Fare/],
        ['wait_time_pay', /^Wait Time/],
        ['fare_subtotal', /^Fare\b/],
        ['tip', /^Tip\b/],
    ];
    for (const li of document.querySelectorAll('li')) {
        const text = li.textContent.trim();
        const value = text.match(new RegExp(money));
        if (!value) continue;
        for (const [key, re] of items) {
            if (re.test(text) && !out[key]) out[key] = value[1];
        }
    }

    const find = label => {
        const m = all.match(new RegExp(label + '[^$]*?' + money, 'i'));
        return m ? m[1] : '';
    };
    out.region_fee = find('Region or City Fee');
    out.airport_fee = find('Airport Fee');
    out.insurance_fee = find('insurance and operational');
    out.service_fee = find('Service Fee');
    out.customer_fare = find('Total customer fare');
    out.total_earnings = find('Your earnings');
    if (!out.tip) {
        const tm = all.match(new RegExp(money + '\\s*tip included', 'i'));
        out.tip = tm ? tm[1] : '';
    }
    return out;
})()
"#;

#[derive(Debug, Deserialize)]
struct TripLink {
    href: String,
    text: String,
}

/// Chrome を操作するドライバー
pub struct ChromeDriver {
    config: ScraperConfig,
    browser: Option<Browser>,
    page: Option<Page>,
}

impl ChromeDriver {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            browser: None,
            page: None,
        }
    }

    /// ブラウザを起動してダッシュボードを開く
    pub async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("Initializing browser...");
        std::fs::create_dir_all(&self.config.user_data_dir)?;

        let chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .ok();

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&self.config.user_data_dir)
            .window_size(1280, 900)
            .request_timeout(self.config.timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");

        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        self.browser = Some(browser);
        self.page = Some(page);
        info!("Browser initialized (profile: {:?})", self.config.user_data_dir);
        Ok(())
    }

    /// ブラウザを閉じる
    pub async fn close(&mut self) -> Result<(), ScraperError> {
        info!("Closing browser...");
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
        }
        Ok(())
    }

    fn page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("ブラウザが初期化されていません".into()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, ScraperError> {
        self.page()?
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        self.page()?
            .goto(url)
            .await
            .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?;
        self.wait_stable().await;
        Ok(())
    }

    /// DOMの大きさが連続して変わらなくなるまで待つ（タイムアウトしても続行）
    async fn wait_stable(&self) {
        let start = Instant::now();
        let mut last_len: Option<usize> = None;
        let mut stable_count = 0;

        while start.elapsed() < self.config.timeout {
            match self
                .eval::<usize>("document.documentElement.outerHTML.length")
                .await
            {
                Ok(len) if last_len == Some(len) => {
                    stable_count += 1;
                    if stable_count >= REQUIRED_STABLE_CHECKS {
                        debug!("Page stable after {:?}", start.elapsed());
                        return;
                    }
                }
                Ok(len) => {
                    stable_count = 0;
                    last_len = Some(len);
                }
                Err(e) => {
                    debug!("Page stable check error: {}", e);
                    stable_count = 0;
                }
            }
            sleep(Duration::from_millis(STABLE_CHECK_INTERVAL_MS)).await;
        }
        warn!("Page stable timeout after {:?}, proceeding anyway", start.elapsed());
    }

    /// デバッグモード時にスクリーンショットをログ出力
    async fn debug_screenshot(&self, label: &str) {
        if !self.config.debug {
            return;
        }
        let Ok(page) = self.page() else { return };
        if let Ok(screenshot) = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
            debug!("{} screenshot: data:image/png;base64,{}", label, encoded);
        }
    }

    /// 「さらに読み込む」を押し切る（チャレンジが出たら押さずに中断）
    async fn expand_listing(&mut self) -> Result<(), ScraperError> {
        let mut clicks = 0;
        while clicks < MAX_LOAD_MORE_CLICKS {
            if self.challenge_shown().await? {
                return Err(ScraperError::ChallengeShown);
            }
            self.config.action_delay.wait().await;
            if !self.eval::<bool>(CLICK_LOAD_MORE_SCRIPT).await? {
                break;
            }
            clicks += 1;
            debug!("Load more clicked {}x", clicks);
            self.wait_stable().await;
        }
        if clicks > 0 {
            info!("Clicked Load more {} times", clicks);
        }
        Ok(())
    }
}

#[async_trait]
impl UiDriver for ChromeDriver {
    async fn open_dashboard(&mut self) -> Result<(), ScraperError> {
        let url = self.config.dashboard_url.clone();
        self.goto(&url).await
    }

    async fn submit_week_range(&mut self, range: &str) -> Result<(), ScraperError> {
        let page = self.page()?;

        let mut input = None;
        for selector in WEEK_INPUT_SELECTORS {
            if let Ok(element) = page.find_element(*selector).await {
                debug!("Week search input found: {}", selector);
                input = Some(element);
                break;
            }
        }
        let Some(input) = input else {
            self.debug_screenshot("week search").await;
            return Err(ScraperError::ElementNotFound("week search input".into()));
        };

        input
            .click()
            .await
            .map_err(|e| ScraperError::Navigation(format!("week search click: {}", e)))?;
        // 既存の入力を選択して上書きする
        page.evaluate("document.activeElement && document.activeElement.select && document.activeElement.select()")
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        input
            .type_str(range)
            .await
            .map_err(|e| ScraperError::Navigation(format!("week search input: {}", e)))?;
        input
            .press_key("Tab")
            .await
            .map_err(|e| ScraperError::Navigation(format!("week search submit: {}", e)))?;

        debug!("Submitted week range: {}", range);
        self.wait_stable().await;
        Ok(())
    }

    async fn displayed_week(&mut self) -> Result<Option<String>, ScraperError> {
        let text: String = self.eval(DISPLAYED_WEEK_SCRIPT).await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn ride_entries(&mut self) -> Result<Vec<RideEntry>, ScraperError> {
        self.expand_listing().await?;
        let links: Vec<TripLink> = self.eval(TRIP_LINKS_SCRIPT).await?;
        Ok(links
            .into_iter()
            .map(|link| RideEntry::new(link.href, link.text))
            .collect())
    }

    async fn open_ride(&mut self, entry: &RideEntry) -> Result<(), ScraperError> {
        self.goto(&entry.id).await?;
        self.config.action_delay.wait().await;
        if self.eval::<bool>(EXPAND_FARE_SCRIPT).await.unwrap_or(false) {
            self.wait_stable().await;
        }
        Ok(())
    }

    async fn read_fare_fields(&mut self) -> Result<FareFields, ScraperError> {
        let raw: HashMap<String, Value> = self.eval(FARE_FIELDS_SCRIPT).await?;
        Ok(FareFields::from_raw(
            raw.into_iter()
                .filter_map(|(key, value)| value_text(value).map(|text| (key, text)))
                .collect(),
        ))
    }

    async fn close_ride(&mut self) -> Result<(), ScraperError> {
        self.page()?
            .evaluate("history.back()")
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        self.wait_stable().await;
        Ok(())
    }

    async fn challenge_shown(&mut self) -> Result<bool, ScraperError> {
        let text: String = self
            .eval("document.body ? document.body.innerText.toLowerCase() : ''")
            .await?;
        Ok(contains_challenge(&text))
    }
}

/// スクリプトの戻り値を文字列に（null は項目なし扱い）
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn contains_challenge(page_text: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| page_text.contains(m))
}
