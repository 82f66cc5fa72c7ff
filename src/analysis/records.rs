//! Registry Record Model
//!
//! Raw rows as they appear in the actual-price-registration exports, and the
//! normalized records every analysis stage consumes.
//!
//! ```text
//! CSV row ──serde──▶ RawTransactionRow ──normalize──▶ TransactionRecord
//! CSV row ──serde──▶ RawProjectRow     ──normalize──▶ ProjectRecord
//! ```
//!
//! Raw rows keep every field optional so that exploration can measure null
//! rates before anything is rejected.

use crate::analysis::season::YearSeason;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// PRICE UNITS
// =============================================================================

/// Unit the raw price columns are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceUnit {
    /// 萬元 (10,000 NTD). Used by every stage internally.
    #[default]
    Wan,
    /// 元. Divided by 10,000 on load.
    Yuan,
}

impl PriceUnit {
    /// Convert a raw price into 萬.
    pub fn to_wan(&self, value: f64) -> f64 {
        match self {
            Self::Wan => value,
            Self::Yuan => value / 10_000.0,
        }
    }
}

// =============================================================================
// RAW ROWS
// =============================================================================

/// Transaction row exactly as exported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionRow {
    #[serde(rename = "備查編號", default)]
    pub project_code: Option<String>,
    #[serde(rename = "縣市", default)]
    pub county: Option<String>,
    #[serde(rename = "行政區", default)]
    pub district: Option<String>,
    #[serde(rename = "坐落街道", alias = "坐落", default)]
    pub street: Option<String>,
    #[serde(rename = "樓層", default)]
    pub floor: Option<String>,
    #[serde(rename = "社區名稱", alias = "建案名稱", default)]
    pub community_name: Option<String>,
    #[serde(rename = "交易日期", default)]
    pub transaction_date: Option<String>,
    #[serde(rename = "交易年季", default)]
    pub season: Option<String>,
    #[serde(rename = "交易總價", default)]
    pub total_price: Option<String>,
    #[serde(rename = "建物單價", default)]
    pub unit_price: Option<String>,
    #[serde(rename = "總面積", alias = "總面積_數值", default)]
    pub area: Option<String>,
    #[serde(rename = "解約情形", default)]
    pub cancellation: Option<String>,
    #[serde(rename = "主要用途", default)]
    pub usage: Option<String>,
}

/// Project (community) row exactly as exported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProjectRow {
    #[serde(rename = "編號", default)]
    pub code: Option<String>,
    #[serde(rename = "社區名稱", alias = "社区名稱", default)]
    pub name: Option<String>,
    #[serde(rename = "縣市", default)]
    pub county: Option<String>,
    #[serde(rename = "行政區", default)]
    pub district: Option<String>,
    #[serde(rename = "坐落街道", default)]
    pub street: Option<String>,
    #[serde(rename = "戶數", alias = "總戶數", default)]
    pub total_units: Option<String>,
    #[serde(rename = "銷售起始時間", default)]
    pub sales_start_date: Option<String>,
    #[serde(rename = "銷售起始年季", default)]
    pub sales_start_season: Option<String>,
}

// =============================================================================
// NORMALIZED RECORDS
// =============================================================================

/// One registered presale transaction, prices in 萬.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub project_code: String,
    pub county: String,
    pub district: String,
    pub street: String,
    pub floor: String,
    pub community_name: String,
    pub transaction_date: Option<NaiveDate>,
    pub season: YearSeason,
    /// 交易總價 (萬)
    pub total_price: Option<f64>,
    /// 建物單價 (萬/坪)
    pub unit_price: Option<f64>,
    /// 總面積 (坪)
    pub area: Option<f64>,
    pub cancellation_text: String,
    pub usage: String,
}

impl TransactionRecord {
    /// No cancellation was registered against the transaction.
    pub fn is_normal(&self) -> bool {
        self.cancellation_text.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        !self.is_normal()
    }
}

/// One presale project from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub code: String,
    pub name: String,
    pub county: String,
    pub district: String,
    pub street: String,
    pub total_units: Option<u32>,
    pub sales_start_date: Option<NaiveDate>,
    pub sales_start_season: Option<YearSeason>,
}

/// Why a raw row could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    MissingField(&'static str),
    InvalidSeason(String),
    InvalidDate(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing {}", field),
            Self::InvalidSeason(text) => write!(f, "invalid season {:?}", text),
            Self::InvalidDate(text) => write!(f, "invalid date {:?}", text),
        }
    }
}

/// Trimmed, non-empty text or `None`.
pub fn clean_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .map(str::to_string)
}

/// Parse a registry number, tolerating thousands separators.
pub fn parse_number(value: &Option<String>) -> Option<f64> {
    let text = clean_text(value)?;
    text.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the date formats seen across registry exports.
///
/// Accepts `YYYYMMDD`, `YYYY/MM/DD`, `YYYY-MM-DD`, ROC `YYYMMDD`, ROC
/// `YYY/MM/DD` and ROC `YYMMDD`. A trailing `.0` left by spreadsheet tools
/// is ignored.
pub fn parse_registry_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let text = text.strip_suffix(".0").unwrap_or(text);
    if text.is_empty() {
        return None;
    }

    if text.contains('/') || text.contains('-') {
        let parts: Vec<&str> = text.split(['/', '-']).collect();
        if parts.len() != 3 {
            return None;
        }
        let year: i32 = parts[0].parse().ok()?;
        let month: u32 = parts[1].parse().ok()?;
        let day: u32 = parts[2].parse().ok()?;
        let year = if year < 1000 { year + 1911 } else { year };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    compact_date(text)
}

/// Compact digit-only dates: 8 digits AD, 7 digits ROC, 6 digits ROC.
/// Anything but ASCII digits is rejected.
pub fn compact_date(digits: &str) -> Option<NaiveDate> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (year, rest) = match digits.len() {
        8 => (digits[..4].parse::<i32>().ok()?, &digits[4..]),
        7 => (digits[..3].parse::<i32>().ok()? + 1911, &digits[3..]),
        6 => (digits[..2].parse::<i32>().ok()? + 1911, &digits[2..]),
        _ => return None,
    };
    let month: u32 = rest[..2].parse().ok()?;
    let day: u32 = rest[2..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

impl RawTransactionRow {
    /// Normalize into a [`TransactionRecord`].
    ///
    /// The season comes from 交易年季 when present, otherwise from the
    /// transaction date.
    pub fn normalize(&self, unit: PriceUnit) -> Result<TransactionRecord, RejectReason> {
        let project_code =
            clean_text(&self.project_code).ok_or(RejectReason::MissingField("備查編號"))?;
        let county = clean_text(&self.county).ok_or(RejectReason::MissingField("縣市"))?;
        let district = clean_text(&self.district).ok_or(RejectReason::MissingField("行政區"))?;

        let date_text = clean_text(&self.transaction_date);
        let transaction_date = match &date_text {
            Some(text) => Some(
                parse_registry_date(text).ok_or_else(|| RejectReason::InvalidDate(text.clone()))?,
            ),
            None => None,
        };

        let season = match clean_text(&self.season) {
            Some(text) => text
                .parse::<YearSeason>()
                .map_err(|_| RejectReason::InvalidSeason(text.clone()))?,
            None => transaction_date
                .and_then(YearSeason::from_date)
                .ok_or(RejectReason::MissingField("交易年季"))?,
        };

        Ok(TransactionRecord {
            project_code,
            county,
            district,
            street: clean_text(&self.street).unwrap_or_default(),
            floor: clean_text(&self.floor).unwrap_or_default(),
            community_name: clean_text(&self.community_name).unwrap_or_default(),
            transaction_date,
            season,
            total_price: parse_number(&self.total_price).map(|v| unit.to_wan(v)),
            unit_price: parse_number(&self.unit_price).map(|v| unit.to_wan(v)),
            area: parse_number(&self.area),
            cancellation_text: clean_text(&self.cancellation).unwrap_or_default(),
            usage: clean_text(&self.usage).unwrap_or_default(),
        })
    }
}

impl RawProjectRow {
    /// Normalize into a [`ProjectRecord`].
    pub fn normalize(&self) -> Result<ProjectRecord, RejectReason> {
        let code = clean_text(&self.code).ok_or(RejectReason::MissingField("編號"))?;
        let county = clean_text(&self.county).ok_or(RejectReason::MissingField("縣市"))?;
        let district = clean_text(&self.district).ok_or(RejectReason::MissingField("行政區"))?;

        let sales_start_date = clean_text(&self.sales_start_date)
            .as_deref()
            .and_then(parse_registry_date);
        let sales_start_season = match clean_text(&self.sales_start_season) {
            Some(text) => Some(
                text.parse::<YearSeason>()
                    .map_err(|_| RejectReason::InvalidSeason(text.clone()))?,
            ),
            None => sales_start_date.and_then(YearSeason::from_date),
        };

        let total_units = parse_number(&self.total_units)
            .filter(|v| *v >= 0.0)
            .map(|v| v.round() as u32);

        Ok(ProjectRecord {
            name: clean_text(&self.name).unwrap_or_else(|| code.clone()),
            code,
            county,
            district,
            street: clean_text(&self.street).unwrap_or_default(),
            total_units,
            sales_start_date,
            sales_start_season,
        })
    }
}
