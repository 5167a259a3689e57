//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The engine calls store methods; phases never see the store at all.

use crate::{
    error::SimResult,
    event::EventLogEntry,
    reporter::PeriodReport,
    types::Period,
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct SimStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl SimStore {
    /// Open (or create) the simulation database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::warn!("store: WAL journal mode unavailable for {path}: {e}");
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn run_seed(&self, run_id: &str) -> SimResult<Option<u64>> {
        let seed = self
            .conn
            .query_row(
                "SELECT seed FROM run WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seed.map(|s| s as u64))
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, period, phase, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.period as i64,
                entry.phase,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_period(&self, run_id: &str, period: Period) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, period, phase, event_type, payload
             FROM event_log WHERE run_id = ?1 AND period = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, period as i64], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    period:     row.get::<_, i64>(2)? as u64,
                    phase:      row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> SimResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // ── Period reports ─────────────────────────────────────────

    pub fn save_period_report(&self, run_id: &str, report: &PeriodReport) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO period_report (run_id, period, stable_price, ether_price, report_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                report.period as i64,
                report.stable_price,
                report.ether_price,
                serde_json::to_string(report)?,
            ],
        )?;
        Ok(())
    }

    pub fn period_reports(&self, run_id: &str) -> SimResult<Vec<PeriodReport>> {
        let mut stmt = self.conn.prepare(
            "SELECT report_json FROM period_report WHERE run_id = ?1 ORDER BY period ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut reports = Vec::with_capacity(rows.len());
        for json in rows {
            reports.push(serde_json::from_str(&json)?);
        }
        Ok(reports)
    }

    // ── Snapshot ───────────────────────────────────────────────

    pub fn save_snapshot(&self, run_id: &str, period: Period, state_json: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO snapshot (run_id, period, state_json) VALUES (?1, ?2, ?3)",
            params![run_id, period as i64, state_json],
        )?;
        Ok(())
    }

    pub fn latest_snapshot_before(
        &self,
        run_id: &str,
        period: Period,
    ) -> SimResult<Option<(Period, String)>> {
        let result = self
            .conn
            .query_row(
                "SELECT period, state_json FROM snapshot
                 WHERE run_id = ?1 AND period <= ?2
                 ORDER BY period DESC LIMIT 1",
                params![run_id, period as i64],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result)
    }
}
