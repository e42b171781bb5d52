use thiserror::Error;

use crate::week::WeekWindow;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("セキュリティチェックが表示されています")]
    ChallengeShown,

    #[error("日付を解釈できません: {0}")]
    DateParse(String),

    #[error("明細の解析エラー: {0}")]
    RecordParse(String),

    #[error("ダッシュボード構造エラー: {0}")]
    Structural(String),

    #[error("オペレーター入力エラー: {0}")]
    Operator(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("CSV書き込みエラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("処理中断 (最終完了週: {}): {source}", describe_last(.last_completed))]
    Halted {
        last_completed: Option<WeekWindow>,
        #[source]
        source: Box<ScraperError>,
    },
}

impl ScraperError {
    /// 一時的なUI失敗かどうか（リトライ対象）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScraperError::Navigation(_) | ScraperError::Timeout(_) | ScraperError::JavaScript(_)
        )
    }

    /// リトライ上限に達した一時エラーを構造エラーへ昇格
    pub fn escalate(self, action: &str, attempts: u32) -> ScraperError {
        match self {
            e if e.is_retryable() => ScraperError::Structural(format!(
                "{} failed after {} attempts: {}",
                action, attempts, e
            )),
            ScraperError::ElementNotFound(what) => {
                ScraperError::Structural(format!("{}: element not found: {}", action, what))
            }
            other => other,
        }
    }
}

fn describe_last(last: &Option<WeekWindow>) -> String {
    match last {
        Some(window) => window.to_string(),
        None => "なし".to_string(),
    }
}
