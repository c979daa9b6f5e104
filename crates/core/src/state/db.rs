//! # Run Store
//!
//! SQLite persistence for finished and failed runs at `.assay/assay.db`.
//! A completed run keeps its full report plus one row per message, artifact
//! version and validation; a failed run keeps its audit trail and the error.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::io::get_runtime_path;
use crate::error::PipelineError;
use crate::skills::artifact_registry::{Artifact, GenerationMode, ValidationResult};
use crate::swarm::events::Message;
use crate::swarm::report::GenerationReport;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

/// One row of the run listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub id: String,
    pub target_id: String,
    pub status: RunStatus,
    pub approved: bool,
    pub outcome: Option<String>,
    pub overall_score: Option<f64>,
    pub artifact_version: Option<u32>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub finished_at: String,
}

/// A run loaded back from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub summary: RunSummary,
    /// Absent for failed runs
    pub report: Option<GenerationReport>,
    pub messages: Vec<Message>,
}

pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    /// Open or create the store inside the runtime directory
    pub fn open() -> Result<Self> {
        Self::open_at(get_runtime_path().join("assay.db"))
    }

    /// Open the store at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open run store {}", path.as_ref().display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory run store")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persist a completed run with every message, artifact and validation
    pub fn save_report(&self, report: &GenerationReport) -> Result<()> {
        let report_json = serde_json::to_string(report).context("Failed to serialize report")?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO runs
                (id, target_id, status, approved, outcome, overall_score,
                 artifact_version, error_kind, error, report_json, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, ?9, ?10)
            "#,
            params![
                report.conversation_id,
                report.target_id,
                RunStatus::Completed.as_str(),
                report.approved,
                report.outcome.as_str(),
                report.validation.overall_score,
                report.artifact.version,
                report_json,
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
            ],
        )?;
        insert_messages(&tx, &report.conversation_id, &report.audit_trail)?;

        for artifact in &report.artifacts {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO artifacts (conversation_id, version, mode, data, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    report.conversation_id,
                    artifact.version,
                    mode_label(artifact.mode),
                    serde_json::to_string(artifact)?,
                    artifact.created_at.to_rfc3339(),
                ],
            )?;
        }
        for validation in &report.validations {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO validations
                    (conversation_id, artifact_version, overall_score, approved, data)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    report.conversation_id,
                    validation.artifact_version,
                    validation.overall_score,
                    validation.approved,
                    serde_json::to_string(validation)?,
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(run = %report.conversation_id, "Saved run");
        Ok(())
    }

    /// Persist a run that ended with an error
    pub fn save_failure(
        &self,
        conversation_id: &str,
        target_id: &str,
        error: &PipelineError,
        messages: &[Message],
    ) -> Result<()> {
        let started_at = messages
            .first()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO runs
                (id, target_id, status, approved, outcome, overall_score,
                 artifact_version, error_kind, error, report_json, started_at, finished_at)
            VALUES (?1, ?2, ?3, 0, NULL, NULL, NULL, ?4, ?5, NULL, ?6, ?7)
            "#,
            params![
                conversation_id,
                target_id,
                RunStatus::Failed.as_str(),
                error.kind(),
                error.to_string(),
                started_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        insert_messages(&tx, conversation_id, messages)?;

        tx.commit()?;
        tracing::debug!(run = %conversation_id, "Saved failed run");
        Ok(())
    }

    /// Delete a run and everything recorded for it
    pub fn delete_run(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for table in ["messages", "artifacts", "validations"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE conversation_id = ?1", table),
                params![id],
            )?;
        }
        let deleted = tx.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Most recent runs first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, target_id, status, approved, outcome, overall_score,
                   artifact_version, error_kind, error, finished_at
            FROM runs
            ORDER BY finished_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], summary_from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    pub fn load_run(&self, id: &str) -> Result<Option<StoredRun>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                r#"
                SELECT id, target_id, status, approved, outcome, overall_score,
                       artifact_version, error_kind, error, finished_at, report_json
                FROM runs WHERE id = ?1
                "#,
                params![id],
                |row| Ok((summary_from_row(row)?, row.get::<_, Option<String>>(10)?)),
            )
            .optional()?
        };
        let Some((summary, report_json)) = row else {
            return Ok(None);
        };

        let report = report_json
            .map(|json| serde_json::from_str::<GenerationReport>(&json))
            .transpose()
            .with_context(|| format!("Stored report for '{}' is corrupt", id))?;
        let messages = self.messages(id)?;

        Ok(Some(StoredRun {
            summary,
            report,
            messages,
        }))
    }

    /// Audit trail of a run in sequence order
    pub fn messages(&self, id: &str) -> Result<Vec<Message>> {
        self.load_json(
            "SELECT data FROM messages WHERE conversation_id = ?1 ORDER BY sequence",
            id,
        )
    }

    /// Every artifact version of a run, oldest first
    pub fn artifacts(&self, id: &str) -> Result<Vec<Artifact>> {
        self.load_json(
            "SELECT data FROM artifacts WHERE conversation_id = ?1 ORDER BY version",
            id,
        )
    }

    pub fn validations(&self, id: &str) -> Result<Vec<ValidationResult>> {
        self.load_json(
            "SELECT data FROM validations WHERE conversation_id = ?1 ORDER BY artifact_version",
            id,
        )
    }

    fn load_json<T: serde::de::DeserializeOwned>(&self, sql: &str, id: &str) -> Result<Vec<T>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row?).context("Corrupt stored row")?);
        }
        Ok(items)
    }
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            status TEXT NOT NULL,
            approved INTEGER NOT NULL DEFAULT 0,
            outcome TEXT,
            overall_score REAL,
            artifact_version INTEGER,
            error_kind TEXT,
            error TEXT,
            report_json TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            id TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            kind TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            in_response_to TEXT,
            data TEXT NOT NULL,
            PRIMARY KEY (conversation_id, sequence)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            conversation_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            mode TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (conversation_id, version)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS validations (
            conversation_id TEXT NOT NULL,
            artifact_version INTEGER NOT NULL,
            overall_score REAL NOT NULL,
            approved INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (conversation_id, artifact_version)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_finished ON runs(finished_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_kind ON messages(kind)",
        [],
    )?;

    tracing::info!("RunStore initialized with schema version {}", SCHEMA_VERSION);
    Ok(())
}

fn insert_messages(conn: &Connection, conversation_id: &str, messages: &[Message]) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT OR REPLACE INTO messages
            (conversation_id, sequence, id, sender, recipient, kind, timestamp, in_response_to, data)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )?;
    for message in messages {
        stmt.execute(params![
            conversation_id,
            message.sequence as i64,
            message.id,
            message.sender,
            message.recipient,
            message.kind.as_str(),
            message.timestamp.to_rfc3339(),
            message.in_response_to,
            serde_json::to_string(message)?,
        ])?;
    }
    Ok(())
}

fn mode_label(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Create => "create",
        GenerationMode::Refine => "refine",
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunSummary> {
    Ok(RunSummary {
        id: row.get(0)?,
        target_id: row.get(1)?,
        status: RunStatus::parse(&row.get::<_, String>(2)?),
        approved: row.get(3)?,
        outcome: row.get(4)?,
        overall_score: row.get(5)?,
        artifact_version: row.get(6)?,
        error_kind: row.get(7)?,
        error: row.get(8)?,
        finished_at: row.get(9)?,
    })
}
