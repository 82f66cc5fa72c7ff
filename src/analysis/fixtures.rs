//! Record builders shared by the unit tests.

use crate::analysis::records::{ProjectRecord, TransactionRecord};
use crate::analysis::season::YearSeason;
use chrono::NaiveDate;

pub fn season(text: &str) -> YearSeason {
    text.parse().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Normal transaction in 台北市大安區 dated on the first day of `season`.
pub fn txn(code: &str, season_text: &str) -> TransactionRecord {
    let s = season(season_text);
    TransactionRecord {
        project_code: code.to_string(),
        county: "台北市".to_string(),
        district: "大安區".to_string(),
        street: "復興南路".to_string(),
        floor: "5F".to_string(),
        community_name: format!("{}社區", code),
        transaction_date: Some(s.start_date()),
        season: s,
        total_price: Some(2000.0),
        unit_price: Some(80.0),
        area: Some(25.0),
        cancellation_text: String::new(),
        usage: "住家用".to_string(),
    }
}

/// Cancelled copy of [`txn`].
pub fn cancelled(code: &str, season_text: &str) -> TransactionRecord {
    TransactionRecord { cancellation_text: "全部解約".to_string(), ..txn(code, season_text) }
}

pub fn project(code: &str, units: u32, start: &str) -> ProjectRecord {
    let s = season(start);
    ProjectRecord {
        code: code.to_string(),
        name: format!("{}社區", code),
        county: "台北市".to_string(),
        district: "大安區".to_string(),
        street: "復興南路".to_string(),
        total_units: Some(units),
        sales_start_date: Some(s.start_date()),
        sales_start_season: Some(s),
    }
}
