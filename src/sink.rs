//! 明細の出力先（追記専用）
//!
//! 既存の内容は変更・削除しない。ヘッダーは新規作成時に一度だけ書く。
//! 実行をまたいだ重複排除は行わない（下流の取り込み処理が
//! 日付・時刻・都市・運賃小計をキーに重複を除く）。

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ScraperError;
use crate::record::{RideRecord, CSV_HEADERS};

pub trait RecordSink: Send {
    /// 明細を末尾に追記する
    fn append(&mut self, records: &[RideRecord]) -> Result<(), ScraperError>;
}

/// CSVファイルへの追記
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 既に保存されている行数（ヘッダー除く）
    pub fn existing_rows(&self) -> Result<usize, ScraperError> {
        if !self.path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;
        let mut count = 0;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }

    fn needs_header(&self) -> Result<bool, ScraperError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() == 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, records: &[RideRecord]) -> Result<(), ScraperError> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let write_header = self.needs_header()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        if write_header {
            debug!("Created {:?} with header", self.path);
        }
        info!("Appended {} rides to {:?}", records.len(), self.path);
        Ok(())
    }
}

/// メモリ上の出力先（CSVと同じく先頭に一度だけヘッダーを持つ）
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Vec<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// ヘッダー行を含む全行
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// ヘッダーを除いた行数
    pub fn record_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, records: &[RideRecord]) -> Result<(), ScraperError> {
        if records.is_empty() {
            return Ok(());
        }
        if self.rows.is_empty() {
            self.rows
                .push(CSV_HEADERS.iter().map(|h| h.to_string()).collect());
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for record in records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ScraperError::FileIO(e.into_error()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice());
        for row in reader.records() {
            self.rows.push(row?.iter().map(str::to_string).collect());
        }
        Ok(())
    }
}
