//! Presale Absorption Analysis
//!
//! Absorption, cancellation and risk analytics over Taiwan's presale
//! actual-price-registration exports, reported at community, district and
//! city level.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────┐   ┌────────────────────────────┐
//! │ transactions CSV           │   │ projects CSV               │
//! └─────────────┬──────────────┘   └─────────────┬──────────────┘
//!               └───────────────┬────────────────┘
//!                               ▼
//!                  loader ─► exploration
//!                               │
//!                               ▼
//!          cancellation ─► dedup ─► matching (profiles, active set)
//!                               │
//!                               ▼
//!     absorption (rayon) ─► dynamics ─► stage_risk
//!                               │
//!                               ▼
//!   community_report ─► aggregation (district, city, consistency)
//!                               │
//!                               ▼
//!            insights ─► charts / export ─► run_store
//! ```
//!
//! `pipeline` drives the stages in this order under the
//! [`crate::performance`] monitor.
//!
//! # Conventions
//!
//! - **Seasons**: ROC year plus quarter, written `113Y2S`
//! - **Prices**: 萬 (10,000 NTD); 單價 in 萬/坪
//! - **Rates**: percent, rounded to 2 decimals in reports
//! - **Ordering**: every batch output is sorted by (code, season)

pub mod absorption;
pub mod aggregation;
pub mod cancellation;
pub mod charts;
pub mod community_report;
pub mod config;
pub mod dedup;
pub mod dynamics;
pub mod exploration;
pub mod export;
pub mod insights;
pub mod kmeans;
pub mod loader;
pub mod matching;
pub mod pipeline;
pub mod records;
pub mod run_store;
pub mod season;
pub mod stage_risk;
pub mod stats;

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod absorption_tests;
#[cfg(test)]
mod aggregation_tests;
#[cfg(test)]
mod cancellation_tests;
#[cfg(test)]
mod community_report_tests;
#[cfg(test)]
mod insights_tests;
#[cfg(test)]
mod matching_tests;
#[cfg(test)]
mod stage_risk_tests;

pub use config::{ConfigError, PipelineConfig};
pub use loader::LoadError;
pub use pipeline::{IntegrityReport, Pipeline, PipelineOutcome, PipelineSummary};
pub use records::{PriceUnit, ProjectRecord, TransactionRecord};
pub use run_store::{RunRecord, RunStore};
pub use season::{SeasonParseError, YearSeason};
