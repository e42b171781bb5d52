use async_trait::async_trait;

use crate::error::ScraperError;
use crate::record::FareFields;

/// 週一覧に並ぶ1件の乗車
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideEntry {
    /// 明細画面を開くための識別子（URLなど）
    pub id: String,
    /// 一覧に表示されている概要（警告メッセージ用）
    pub summary: String,
}

impl RideEntry {
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
        }
    }
}

/// ダッシュボードを操作するUIドライバー
///
/// ナビゲーター以外がセッションを操作してはならないため、すべて `&mut self` を取る。
#[async_trait]
pub trait UiDriver: Send {
    /// ダッシュボードのトップへ移動
    async fn open_dashboard(&mut self) -> Result<(), ScraperError>;

    /// 週検索欄に期間文字列を入力して確定
    async fn submit_week_range(&mut self, range: &str) -> Result<(), ScraperError>;

    /// 現在表示中の週の期間表示（取得できない場合は None）
    async fn displayed_week(&mut self) -> Result<Option<String>, ScraperError>;

    /// 読み込まれている週の乗車一覧（表示順）
    async fn ride_entries(&mut self) -> Result<Vec<RideEntry>, ScraperError>;

    /// 乗車の明細画面を開く
    async fn open_ride(&mut self, entry: &RideEntry) -> Result<(), ScraperError>;

    /// 明細画面の料金項目を読み取る
    async fn read_fare_fields(&mut self) -> Result<FareFields, ScraperError>;

    /// 明細画面を閉じて一覧へ戻る
    async fn close_ride(&mut self) -> Result<(), ScraperError>;

    /// セキュリティチェックが表示されているか
    async fn challenge_shown(&mut self) -> Result<bool, ScraperError>;
}
