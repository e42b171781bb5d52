//! 乗車明細の型定義

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// 金額（セント単位、非負）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> u64 {
        self.0
    }

    /// `$12.34` / `12.34` / `$1,234` / `-$2.50` を解釈する
    ///
    /// 控除として表示される `-$` は絶対値で保持する。
    pub fn parse(text: &str) -> Option<Money> {
        let s = text.trim();
        let s = s.strip_prefix('-').unwrap_or(s).trim_start();
        let s = s.strip_prefix('$').unwrap_or(s);
        let s: String = s.chars().filter(|c| *c != ',').collect();

        let (whole, frac) = s.split_once('.').unwrap_or((s.as_str(), ""));
        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let dollars: u64 = whole.parse().ok()?;
        let cents: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        dollars.checked_mul(100)?.checked_add(cents).map(Money)
    }

    /// 金額 / 量 (1マイルあたり、1分あたり)
    pub fn per_unit(&self, quantity: f64) -> Option<Money> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return None;
        }
        Some(Money((self.0 as f64 / quantity).round() as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 明細画面から読み取る項目名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FareField {
    Date,
    Time,
    RideType,
    DistancePay,
    TimePay,
    Surge,
    Promotion,
    BaseFare,
    FareSubtotal,
    Tip,
    MinimumFareSupplement,
    WaitTimePay,
    RegionFee,
    AirportFee,
    InsuranceFee,
    ServiceFee,
    TotalEarnings,
    CustomerFare,
    Points,
    City,
    Pickup,
    Dropoff,
    Distance,
    Duration,
}

impl FareField {
    pub const ALL: [FareField; 24] = [
        FareField::Date,
        FareField::Time,
        FareField::RideType,
        FareField::DistancePay,
        FareField::TimePay,
        FareField::Surge,
        FareField::Promotion,
        FareField::BaseFare,
        FareField::FareSubtotal,
        FareField::Tip,
        FareField::MinimumFareSupplement,
        FareField::WaitTimePay,
        FareField::RegionFee,
        FareField::AirportFee,
        FareField::InsuranceFee,
        FareField::ServiceFee,
        FareField::TotalEarnings,
        FareField::CustomerFare,
        FareField::Points,
        FareField::City,
        FareField::Pickup,
        FareField::Dropoff,
        FareField::Distance,
        FareField::Duration,
    ];

    /// ドライバーが返すキー名
    pub fn key(&self) -> &'static str {
        match self {
            FareField::Date => "date",
            FareField::Time => "time",
            FareField::RideType => "ride_type",
            FareField::DistancePay => "distance_pay",
            FareField::TimePay => "time_pay",
            FareField::Surge => "surge",
            FareField::Promotion => "promotion",
            FareField::BaseFare => "base_fare",
            FareField::FareSubtotal => "fare_subtotal",
            FareField::Tip => "tip",
            FareField::MinimumFareSupplement => "minimum_fare_supplement",
            FareField::WaitTimePay => "wait_time_pay",
            FareField::RegionFee => "region_fee",
            FareField::AirportFee => "airport_fee",
            FareField::InsuranceFee => "insurance_fee",
            FareField::ServiceFee => "service_fee",
            FareField::TotalEarnings => "total_earnings",
            FareField::CustomerFare => "customer_fare",
            FareField::Points => "points",
            FareField::City => "city",
            FareField::Pickup => "pickup",
            FareField::Dropoff => "dropoff",
            FareField::Distance => "distance",
            FareField::Duration => "duration",
        }
    }

    pub fn from_key(key: &str) -> Option<FareField> {
        FareField::ALL.iter().copied().find(|f| f.key() == key)
    }
}

/// 明細画面の項目（生テキスト）
#[derive(Debug, Clone, Default)]
pub struct FareFields {
    values: HashMap<FareField, String>,
}

impl FareFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: FareField, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: FareField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    /// 空文字列は「項目なし」として扱う
    pub fn get(&self, field: FareField) -> Option<&str> {
        self.values
            .get(&field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// キー名付きの生データから構築（未知のキーは無視）
    pub fn from_raw(raw: HashMap<String, String>) -> Self {
        let values = raw
            .into_iter()
            .filter_map(|(k, v)| FareField::from_key(&k).map(|f| (f, v)))
            .collect();
        Self { values }
    }
}

/// 1件の乗車明細（CSVの1行）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Ride Type")]
    pub ride_type: String,
    #[serde(rename = "Distance Pay")]
    pub distance_pay: Option<Money>,
    #[serde(rename = "Time Pay")]
    pub time_pay: Option<Money>,
    #[serde(rename = "Surge")]
    pub surge: Option<Money>,
    #[serde(rename = "Promotion")]
    pub promotion: Option<Money>,
    #[serde(rename = "Base")]
    pub base_fare: Option<Money>,
    #[serde(rename = "Fare (subtotal)")]
    pub fare_subtotal: Option<Money>,
    #[serde(rename = "Tip")]
    pub tip: Option<Money>,
    #[serde(rename = "Minimum Fare Supplement")]
    pub minimum_fare_supplement: Option<Money>,
    #[serde(rename = "Wait Time Pay")]
    pub wait_time_pay: Option<Money>,
    #[serde(rename = "Region/City Fee")]
    pub region_fee: Option<Money>,
    #[serde(rename = "Airport Fee")]
    pub airport_fee: Option<Money>,
    #[serde(rename = "Insurance & Operational Fee")]
    pub insurance_fee: Option<Money>,
    #[serde(rename = "Service Fee")]
    pub service_fee: Option<Money>,
    #[serde(rename = "Total Earnings")]
    pub total_earnings: Option<Money>,
    #[serde(rename = "Total Customer Fare")]
    pub customer_fare: Option<Money>,
    #[serde(rename = "Points Earned")]
    pub points: u32,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Pickup Address")]
    pub pickup: String,
    #[serde(rename = "Dropoff Address")]
    pub dropoff: String,
    #[serde(rename = "Distance (mi)")]
    pub distance_miles: Option<f64>,
    #[serde(rename = "Duration (min)")]
    pub duration_minutes: Option<f64>,
    #[serde(rename = "$/mile")]
    pub per_mile: Option<Money>,
    #[serde(rename = "$/min")]
    pub per_minute: Option<Money>,
}

/// CSVヘッダー（RideRecord のフィールド順）
pub const CSV_HEADERS: [&str; 26] = [
    "Date",
    "Time",
    "Ride Type",
    "Distance Pay",
    "Time Pay",
    "Surge",
    "Promotion",
    "Base",
    "Fare (subtotal)",
    "Tip",
    "Minimum Fare Supplement",
    "Wait Time Pay",
    "Region/City Fee",
    "Airport Fee",
    "Insurance & Operational Fee",
    "Service Fee",
    "Total Earnings",
    "Total Customer Fare",
    "Points Earned",
    "City",
    "Pickup Address",
    "Dropoff Address",
    "Distance (mi)",
    "Duration (min)",
    "$/mile",
    "$/min",
];
