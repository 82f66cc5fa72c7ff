//! Year-Season Semantics
//!
//! This module is the single source of truth for ROC year-season handling.
//! Every stage that buckets transactions by quarter, counts sales seasons or
//! projects a completion quarter goes through [`YearSeason`].
//!
//! # Canonical Form
//!
//! ```text
//! 113Y2S   = ROC year 113 (AD 2024), second quarter
//! ordinal  = year * 10 + quarter   (113Y2S -> 1132)
//! ```
//!
//! The legacy `113S2` spelling found in older cancellation exports is accepted
//! on input but never produced.
//!
//! # Quarter Length
//!
//! Quarter lengths come from the calendar, so Q1 is 90 days (91 in a leap
//! year), Q2 is 91 days and Q3/Q4 are 92 days.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Offset between the AD and ROC calendars.
pub const ROC_YEAR_OFFSET: i32 = 1911;

/// Quarters per year.
pub const QUARTERS_PER_YEAR: i32 = 4;

/// Largest ROC year accepted. Keeps every derived calendar date representable.
const MAX_ROC_YEAR: u16 = 999;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to parse or construct a year-season.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeasonParseError {
    /// Input was empty after trimming.
    Empty,
    /// Input does not follow `YYYYsS` / `YYYSq`.
    Malformed { input: String },
    /// Quarter outside 1..=4.
    QuarterOutOfRange { input: String, quarter: u32 },
    /// ROC year outside 1..=999.
    YearOutOfRange { input: String, year: u32 },
}

impl fmt::Display for SeasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty year-season"),
            Self::Malformed { input } => write!(f, "Malformed year-season: {:?}", input),
            Self::QuarterOutOfRange { input, quarter } => {
                write!(f, "Quarter {} out of range in {:?}", quarter, input)
            }
            Self::YearOutOfRange { input, year } => {
                write!(f, "ROC year {} out of range in {:?}", year, input)
            }
        }
    }
}

impl std::error::Error for SeasonParseError {}

// =============================================================================
// YEAR-SEASON
// =============================================================================

/// ROC year plus quarter. Ordering follows the ordinal `year * 10 + quarter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearSeason {
    year: u16,
    quarter: u8,
}

impl YearSeason {
    /// Construct from an ROC year and a quarter.
    pub fn new(year: u16, quarter: u8) -> Result<Self, SeasonParseError> {
        let input = format!("{}Y{}S", year, quarter);
        if year == 0 || year > MAX_ROC_YEAR {
            return Err(SeasonParseError::YearOutOfRange { input, year: year as u32 });
        }
        if !(1..=4).contains(&quarter) {
            return Err(SeasonParseError::QuarterOutOfRange { input, quarter: quarter as u32 });
        }
        Ok(Self { year, quarter })
    }

    /// Season containing a calendar date.
    ///
    /// Returns `None` for dates before the ROC epoch or beyond year 999.
    pub fn from_date(date: NaiveDate) -> Option<Self> {
        let roc = date.year() - ROC_YEAR_OFFSET;
        if roc < 1 || roc > MAX_ROC_YEAR as i32 {
            return None;
        }
        let quarter = (date.month0() / 3 + 1) as u8;
        Some(Self { year: roc as u16, quarter })
    }

    /// Build from an ordinal such as `1132`.
    pub fn from_ordinal(ordinal: u32) -> Result<Self, SeasonParseError> {
        Self::new((ordinal / 10) as u16, (ordinal % 10) as u8)
    }

    /// ROC year.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// AD year.
    pub fn ad_year(&self) -> i32 {
        self.year as i32 + ROC_YEAR_OFFSET
    }

    /// Quarter, 1..=4.
    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// `year * 10 + quarter`.
    pub fn ordinal(&self) -> u32 {
        self.year as u32 * 10 + self.quarter as u32
    }

    fn linear(&self) -> i32 {
        self.year as i32 * QUARTERS_PER_YEAR + (self.quarter as i32 - 1)
    }

    fn from_linear(linear: i32) -> Self {
        let clamped = linear.clamp(QUARTERS_PER_YEAR, (MAX_ROC_YEAR as i32 + 1) * QUARTERS_PER_YEAR - 1);
        Self {
            year: (clamped / QUARTERS_PER_YEAR) as u16,
            quarter: (clamped % QUARTERS_PER_YEAR + 1) as u8,
        }
    }

    /// Following quarter.
    pub fn next(&self) -> Self {
        self.offset(1)
    }

    /// Preceding quarter.
    pub fn prev(&self) -> Self {
        self.offset(-1)
    }

    /// Move by `quarters` (negative moves backwards). Saturates at the
    /// supported calendar range.
    pub fn offset(&self, quarters: i32) -> Self {
        Self::from_linear(self.linear().saturating_add(quarters))
    }

    /// Signed quarter distance from `self` to `other`.
    pub fn seasons_between(&self, other: &YearSeason) -> i32 {
        other.linear() - self.linear()
    }

    /// First calendar day of the quarter.
    pub fn start_date(&self) -> NaiveDate {
        let month = (self.quarter as u32 - 1) * 3 + 1;
        NaiveDate::from_ymd_opt(self.ad_year(), month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the quarter.
    pub fn end_date(&self) -> NaiveDate {
        self.next()
            .start_date()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    /// Number of calendar days in the quarter.
    pub fn days(&self) -> u32 {
        ((self.end_date() - self.start_date()).num_days() + 1) as u32
    }

    /// A season is complete once the analysis date is past its last day.
    pub fn is_complete(&self, analysis_date: NaiveDate) -> bool {
        analysis_date > self.end_date()
    }

    /// Days of the quarter elapsed at `analysis_date`, clamped to `1..=days()`.
    pub fn elapsed_days(&self, analysis_date: NaiveDate) -> u32 {
        let elapsed = (analysis_date - self.start_date()).num_days() + 1;
        elapsed.clamp(1, self.days() as i64) as u32
    }

    /// Whether `date` falls inside this quarter.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date() && date <= self.end_date()
    }
}

/// Every season from `start` to `end`, inclusive. Empty when `start > end`.
pub fn season_sequence(start: YearSeason, end: YearSeason) -> Vec<YearSeason> {
    let span = start.seasons_between(&end);
    if span < 0 {
        return Vec::new();
    }
    (0..=span).map(|i| start.offset(i)).collect()
}

/// Inclusive number of seasons a project has been selling, at least 1.
pub fn sales_seasons(start: YearSeason, target: YearSeason) -> u32 {
    (start.seasons_between(&target) + 1).max(1) as u32
}

impl fmt::Display for YearSeason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Y{}S", self.year, self.quarter)
    }
}

impl FromStr for YearSeason {
    type Err = SeasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(SeasonParseError::Empty);
        }
        let malformed = || SeasonParseError::Malformed { input: input.to_string() };

        // 113Y2S
        let (year_part, quarter_part) = if let Some(body) = input.strip_suffix('S') {
            body.split_once('Y').ok_or_else(malformed)?
        // 113S2
        } else if let Some((y, q)) = input.split_once('S') {
            (y, q)
        } else {
            return Err(malformed());
        };

        let year: u32 = year_part.parse().map_err(|_| malformed())?;
        let quarter: u32 = quarter_part.parse().map_err(|_| malformed())?;
        if year == 0 || year > MAX_ROC_YEAR as u32 {
            return Err(SeasonParseError::YearOutOfRange { input: input.to_string(), year });
        }
        if !(1..=4).contains(&quarter) {
            return Err(SeasonParseError::QuarterOutOfRange { input: input.to_string(), quarter });
        }
        Ok(Self { year: year as u16, quarter: quarter as u8 })
    }
}

impl TryFrom<String> for YearSeason {
    type Error = SeasonParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearSeason> for String {
    fn from(value: YearSeason) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> YearSeason {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_canonical_and_legacy() {
        assert_eq!(s("113Y2S"), YearSeason::new(113, 2).unwrap());
        assert_eq!(s("112S1"), YearSeason::new(112, 1).unwrap());
        assert_eq!(s(" 110Y4S "), YearSeason::new(110, 4).unwrap());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("".parse::<YearSeason>(), Err(SeasonParseError::Empty));
        assert!(matches!(
            "113Y5S".parse::<YearSeason>(),
            Err(SeasonParseError::QuarterOutOfRange { quarter: 5, .. })
        ));
        assert!(matches!("abc".parse::<YearSeason>(), Err(SeasonParseError::Malformed { .. })));
        assert!(matches!("113YxS".parse::<YearSeason>(), Err(SeasonParseError::Malformed { .. })));
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(s("112S3").to_string(), "112Y3S");
        assert_eq!(s("113Y1S").ordinal(), 1131);
    }

    #[test]
    fn test_from_date() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        assert_eq!(YearSeason::from_date(d), Some(s("113Y2S")));
        let d = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert_eq!(YearSeason::from_date(d), Some(s("112Y4S")));
        let d = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
        assert_eq!(YearSeason::from_date(d), None);
    }

    #[test]
    fn test_next_prev_roll_over_years() {
        assert_eq!(s("112Y4S").next(), s("113Y1S"));
        assert_eq!(s("113Y1S").prev(), s("112Y4S"));
        assert_eq!(s("113Y2S").offset(6), s("114Y4S"));
        assert_eq!(s("113Y2S").offset(-5), s("112Y1S"));
    }

    #[test]
    fn test_sequence_and_sales_seasons() {
        let seq = season_sequence(s("112Y3S"), s("113Y2S"));
        assert_eq!(seq, vec![s("112Y3S"), s("112Y4S"), s("113Y1S"), s("113Y2S")]);
        assert!(season_sequence(s("113Y2S"), s("113Y1S")).is_empty());

        assert_eq!(sales_seasons(s("110Y3S"), s("113Y2S")), 12);
        assert_eq!(sales_seasons(s("113Y2S"), s("113Y2S")), 1);
        // Target before start still counts one season
        assert_eq!(sales_seasons(s("113Y3S"), s("113Y2S")), 1);
    }

    #[test]
    fn test_season_days() {
        // 2024 is a leap year
        assert_eq!(s("113Y1S").days(), 91);
        assert_eq!(s("112Y1S").days(), 90);
        assert_eq!(s("113Y2S").days(), 91);
        assert_eq!(s("113Y3S").days(), 92);
        assert_eq!(s("113Y4S").days(), 92);
    }

    #[test]
    fn test_completeness_and_elapsed_days() {
        let season = s("113Y4S");
        let mid = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap();
        assert!(!season.is_complete(mid));
        assert_eq!(season.elapsed_days(mid), 46);

        let last_day = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert!(!season.is_complete(last_day));
        assert_eq!(season.elapsed_days(last_day), 92);

        let after = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(season.is_complete(after));

        let before = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        assert_eq!(season.elapsed_days(before), 1);
    }

    #[test]
    fn test_serde_uses_text_form() {
        let json = serde_json::to_string(&s("113Y2S")).unwrap();
        assert_eq!(json, "\"113Y2S\"");
        let back: YearSeason = serde_json::from_str("\"112S4\"").unwrap();
        assert_eq!(back, s("112Y4S"));
    }
}
