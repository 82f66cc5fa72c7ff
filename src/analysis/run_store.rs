//! Run Store
//!
//! SQLite record of pipeline runs: one row per run in `runs` and the
//! community report of each run in `community_rows`, so past runs can be
//! listed and compared.

use crate::analysis::community_report::CommunityReportRow;
use crate::analysis::config::PipelineConfig;
use crate::performance::StageMetrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    config_fingerprint TEXT NOT NULL,
    target_seasons TEXT NOT NULL,
    total_secs REAL NOT NULL,
    stage_timings TEXT NOT NULL,
    integrity_passed INTEGER NOT NULL,
    community_rows INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS community_rows (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    code TEXT NOT NULL,
    season TEXT NOT NULL,
    county TEXT NOT NULL,
    district TEXT NOT NULL,
    net_rate REAL NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (run_id, code, season)
);

CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at DESC);
"#;

/// SHA-256 of the config's TOML form, hex encoded.
pub fn config_fingerprint(config: &PipelineConfig) -> Result<String> {
    let toml = toml::to_string(config).context("Failed to serialize config")?;
    Ok(hex::encode(Sha256::digest(toml.as_bytes())))
}

/// One stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config_fingerprint: String,
    pub target_seasons: Vec<String>,
    pub total_secs: f64,
    pub stages: Vec<StageMetrics>,
    pub integrity_passed: bool,
    pub community_rows: usize,
}

/// Net-rate change of one (project, season) between two runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDelta {
    pub code: String,
    pub season: String,
    pub before: Option<f64>,
    pub after: Option<f64>,
}

impl RowDelta {
    pub fn change(&self) -> Option<f64> {
        Some(self.after? - self.before?)
    }
}

pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).with_context(|| format!("open run store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).context("create run store schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Store a run and its community rows in one transaction.
    pub fn record_run(&self, run: &RunRecord, rows: &[CommunityReportRow]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (run_id, started_at, config_fingerprint, target_seasons, total_secs,
                               stage_timings, integrity_passed, community_rows)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.started_at.to_rfc3339(),
                run.config_fingerprint,
                serde_json::to_string(&run.target_seasons)?,
                run.total_secs,
                serde_json::to_string(&run.stages)?,
                run.integrity_passed,
                run.community_rows as i64,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO community_rows (run_id, code, season, county, district, net_rate, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    run.run_id,
                    row.code,
                    row.season,
                    row.county,
                    row.district,
                    row.net_rate,
                    serde_json::to_string(row)?,
                ])?;
            }
        }
        tx.commit()?;

        info!(run_id = %run.run_id, rows = rows.len(), "Run recorded");
        Ok(())
    }

    /// Every run, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, started_at, config_fingerprint, target_seasons, total_secs,
                    stage_timings, integrity_passed, community_rows
             FROM runs ORDER BY started_at DESC, run_id ASC",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(run_id, started_at, fingerprint, seasons, total_secs, stages, passed, rows)| {
                Ok(RunRecord {
                    started_at: DateTime::parse_from_rfc3339(&started_at)
                        .with_context(|| format!("bad started_at for run {}", run_id))?
                        .with_timezone(&Utc),
                    run_id,
                    config_fingerprint: fingerprint,
                    target_seasons: serde_json::from_str(&seasons)?,
                    total_secs,
                    stages: serde_json::from_str(&stages)?,
                    integrity_passed: passed,
                    community_rows: rows.max(0) as usize,
                })
            })
            .collect()
    }

    /// Community report of one run, in (code, season) order.
    pub fn load_community_rows(&self, run_id: &str) -> Result<Vec<CommunityReportRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM community_rows WHERE run_id = ?1 ORDER BY code ASC, season ASC",
        )?;
        let payloads = stmt
            .query_map([run_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).context("bad community row payload"))
            .collect()
    }

    /// Net-rate changes between two runs over the union of their rows.
    pub fn compare_runs(&self, before: &str, after: &str) -> Result<Vec<RowDelta>> {
        let mut deltas: BTreeMap<(String, String), RowDelta> = BTreeMap::new();
        for row in self.load_community_rows(before)? {
            deltas.insert(
                (row.code.clone(), row.season.clone()),
                RowDelta { code: row.code, season: row.season, before: Some(row.net_rate), after: None },
            );
        }
        for row in self.load_community_rows(after)? {
            deltas
                .entry((row.code.clone(), row.season.clone()))
                .or_insert_with(|| RowDelta {
                    code: row.code.clone(),
                    season: row.season.clone(),
                    before: None,
                    after: None,
                })
                .after = Some(row.net_rate);
        }
        Ok(deltas.into_values().collect())
    }
}
