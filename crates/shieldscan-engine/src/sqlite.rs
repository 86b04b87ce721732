//! SQLite-backed scan store

use crate::store::ScanStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use shieldscan_core::{
    Error, Finding, Grade, Result, Scan, ScanDepth, ScanStatus, ScoreHistoryEntry, Sensitivity,
    Severity, TargetType,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

const SCAN_COLUMNS: &str = "id, target, target_type, status, scan_depth, sensitivity, \
     modules_enabled, modules_skipped, shield_score, grade, total_checks, passed_checks, \
     failed_checks, warning_checks, module_scores, failure_reason, cancelled, created_at, \
     started_at, completed_at";

const FINDING_COLUMNS: &str = "id, scan_id, module, severity, title, description, remediation, \
     target_ip, target_port, service, evidence, cve_id, cvss_score, epss_score, cisa_kev, \
     attack_technique, attack_tactic, created_at";

/// Scan store backed by a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`; `":memory:"` opens an ephemeral one
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::in_memory();
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("Failed to open scan database {:?}: {}", path, e)))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS scans (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                target TEXT NOT NULL,
                target_type TEXT NOT NULL,
                status TEXT NOT NULL,
                scan_depth TEXT NOT NULL,
                sensitivity TEXT NOT NULL,
                modules_enabled TEXT NOT NULL,
                modules_skipped TEXT NOT NULL,
                shield_score REAL,
                grade TEXT,
                total_checks INTEGER NOT NULL DEFAULT 0,
                passed_checks INTEGER NOT NULL DEFAULT 0,
                failed_checks INTEGER NOT NULL DEFAULT 0,
                warning_checks INTEGER NOT NULL DEFAULT 0,
                module_scores TEXT NOT NULL,
                failure_reason TEXT,
                cancelled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS findings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
                module TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                remediation TEXT,
                target_ip TEXT,
                target_port INTEGER,
                service TEXT,
                evidence TEXT NOT NULL,
                cve_id TEXT,
                cvss_score REAL,
                epss_score REAL,
                cisa_kev INTEGER,
                attack_technique TEXT,
                attack_tactic TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS score_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                scan_id TEXT NOT NULL,
                score REAL NOT NULL,
                grade TEXT NOT NULL,
                module_scores TEXT NOT NULL,
                scanned_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
            CREATE INDEX IF NOT EXISTS idx_findings_scan ON findings(scan_id);
            CREATE INDEX IF NOT EXISTS idx_history_target ON score_history(target);
            "#,
        )
        .map_err(|e| Error::Store(format!("Failed to initialize schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Store(format!("{}: connection lock poisoned", op)))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| Error::Store(format!("{}: worker failed: {}", op, e)))?
    }
}

fn db_err(op: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |e| Error::Store(format!("Failed to {}: {}", op, e))
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_opt_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn bad_column(column: &str, value: &str) -> Error {
    Error::Store(format!("unexpected {} value '{}'", column, value))
}

fn insert_finding(conn: &Connection, f: &Finding) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO findings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            FINDING_COLUMNS
        ),
        params![
            f.id.to_string(),
            f.scan_id,
            f.module,
            f.severity.as_str(),
            f.title,
            f.description,
            f.remediation,
            f.target_ip,
            f.target_port,
            f.service,
            f.evidence.to_string(),
            f.cve_id,
            f.cvss_score,
            f.epss_score,
            f.cisa_kev,
            f.attack_technique,
            f.attack_tactic,
            timestamp(&f.created_at),
        ],
    )
    .map_err(db_err("insert finding"))?;
    Ok(())
}

fn update_scan_row(conn: &Connection, s: &Scan) -> Result<()> {
    let changed = conn
        .execute(
            r#"
            UPDATE scans SET status = ?2, modules_skipped = ?3, shield_score = ?4, grade = ?5,
                total_checks = ?6, passed_checks = ?7, failed_checks = ?8, warning_checks = ?9,
                module_scores = ?10, failure_reason = ?11, cancelled = ?12,
                started_at = ?13, completed_at = ?14
            WHERE id = ?1
            "#,
            params![
                s.id,
                s.status.as_str(),
                serde_json::to_string(&s.modules_skipped)?,
                s.shield_score,
                s.grade.map(|g| g.as_str()),
                s.total_checks,
                s.passed_checks,
                s.failed_checks,
                s.warning_checks,
                serde_json::to_string(&s.module_scores)?,
                s.failure_reason,
                s.cancelled,
                s.started_at.as_ref().map(timestamp),
                s.completed_at.as_ref().map(timestamp),
            ],
        )
        .map_err(db_err("update scan"))?;
    if changed == 0 {
        return Err(Error::ScanNotFound {
            scan_id: s.id.clone(),
        });
    }
    Ok(())
}

fn insert_history(conn: &Connection, e: &ScoreHistoryEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO score_history (target, scan_id, score, grade, module_scores, scanned_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            e.target,
            e.scan_id,
            e.score,
            e.grade.as_str(),
            serde_json::to_string(&e.module_scores)?,
            timestamp(&e.scanned_at),
        ],
    )
    .map_err(db_err("append history"))?;
    Ok(())
}

/// Raw column values; converted to a [`Scan`] outside the row callback so
/// decode failures surface as store errors
struct ScanRow {
    id: String,
    target: String,
    target_type: String,
    status: String,
    scan_depth: String,
    sensitivity: String,
    modules_enabled: String,
    modules_skipped: String,
    shield_score: Option<f64>,
    grade: Option<String>,
    total_checks: u32,
    passed_checks: u32,
    failed_checks: u32,
    warning_checks: u32,
    module_scores: String,
    failure_reason: Option<String>,
    cancelled: bool,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl ScanRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            target: row.get(1)?,
            target_type: row.get(2)?,
            status: row.get(3)?,
            scan_depth: row.get(4)?,
            sensitivity: row.get(5)?,
            modules_enabled: row.get(6)?,
            modules_skipped: row.get(7)?,
            shield_score: row.get(8)?,
            grade: row.get(9)?,
            total_checks: row.get(10)?,
            passed_checks: row.get(11)?,
            failed_checks: row.get(12)?,
            warning_checks: row.get(13)?,
            module_scores: row.get(14)?,
            failure_reason: row.get(15)?,
            cancelled: row.get(16)?,
            created_at: row.get(17)?,
            started_at: row.get(18)?,
            completed_at: row.get(19)?,
        })
    }

    fn into_scan(self) -> Result<Scan> {
        let grade = match self.grade.as_deref() {
            Some(g) => Some(Grade::parse(g).ok_or_else(|| bad_column("grade", g))?),
            None => None,
        };
        Ok(Scan {
            target_type: TargetType::parse(&self.target_type)
                .ok_or_else(|| bad_column("target_type", &self.target_type))?,
            status: ScanStatus::parse(&self.status).ok_or_else(|| bad_column("status", &self.status))?,
            scan_depth: ScanDepth::parse(&self.scan_depth)
                .ok_or_else(|| bad_column("scan_depth", &self.scan_depth))?,
            sensitivity: Sensitivity::parse(&self.sensitivity)
                .ok_or_else(|| bad_column("sensitivity", &self.sensitivity))?,
            modules_enabled: serde_json::from_str(&self.modules_enabled)?,
            modules_skipped: serde_json::from_str(&self.modules_skipped)?,
            shield_score: self.shield_score,
            grade,
            total_checks: self.total_checks,
            passed_checks: self.passed_checks,
            failed_checks: self.failed_checks,
            warning_checks: self.warning_checks,
            module_scores: serde_json::from_str(&self.module_scores)?,
            failure_reason: self.failure_reason,
            cancelled: self.cancelled,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: parse_opt_timestamp(self.started_at)?,
            completed_at: parse_opt_timestamp(self.completed_at)?,
            id: self.id,
            target: self.target,
        })
    }
}

struct FindingRow {
    id: String,
    scan_id: String,
    module: String,
    severity: String,
    title: String,
    description: String,
    remediation: Option<String>,
    target_ip: Option<String>,
    target_port: Option<u16>,
    service: Option<String>,
    evidence: String,
    cve_id: Option<String>,
    cvss_score: Option<f32>,
    epss_score: Option<f32>,
    cisa_kev: Option<bool>,
    attack_technique: Option<String>,
    attack_tactic: Option<String>,
    created_at: String,
}

impl FindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scan_id: row.get(1)?,
            module: row.get(2)?,
            severity: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            remediation: row.get(6)?,
            target_ip: row.get(7)?,
            target_port: row.get(8)?,
            service: row.get(9)?,
            evidence: row.get(10)?,
            cve_id: row.get(11)?,
            cvss_score: row.get(12)?,
            epss_score: row.get(13)?,
            cisa_kev: row.get(14)?,
            attack_technique: row.get(15)?,
            attack_tactic: row.get(16)?,
            created_at: row.get(17)?,
        })
    }

    fn into_finding(self) -> Result<Finding> {
        Ok(Finding {
            id: Uuid::parse_str(&self.id).map_err(|_| bad_column("finding id", &self.id))?,
            severity: Severity::parse(&self.severity).ok_or_else(|| bad_column("severity", &self.severity))?,
            evidence: serde_json::from_str(&self.evidence)?,
            created_at: parse_timestamp(&self.created_at)?,
            scan_id: self.scan_id,
            module: self.module,
            title: self.title,
            description: self.description,
            remediation: self.remediation,
            target_ip: self.target_ip,
            target_port: self.target_port,
            service: self.service,
            cve_id: self.cve_id,
            cvss_score: self.cvss_score,
            epss_score: self.epss_score,
            cisa_kev: self.cisa_kev,
            attack_technique: self.attack_technique,
            attack_tactic: self.attack_tactic,
        })
    }
}

fn query_scans(conn: &Connection, sql: &str) -> Result<Vec<Scan>> {
    let mut stmt = conn.prepare(sql).map_err(db_err("prepare scan query"))?;
    let rows = stmt
        .query_map([], ScanRow::from_row)
        .map_err(db_err("query scans"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("read scan row"))?;
    rows.into_iter().map(ScanRow::into_scan).collect()
}

#[async_trait]
impl ScanStore for SqliteStore {
    async fn insert_scan(&self, scan: &Scan) -> Result<()> {
        let s = scan.clone();
        self.call("insert scan", move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO scans ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                    SCAN_COLUMNS
                ),
                params![
                    s.id,
                    s.target,
                    s.target_type.as_str(),
                    s.status.as_str(),
                    s.scan_depth.as_str(),
                    s.sensitivity.as_str(),
                    serde_json::to_string(&s.modules_enabled)?,
                    serde_json::to_string(&s.modules_skipped)?,
                    s.shield_score,
                    s.grade.map(|g| g.as_str()),
                    s.total_checks,
                    s.passed_checks,
                    s.failed_checks,
                    s.warning_checks,
                    serde_json::to_string(&s.module_scores)?,
                    s.failure_reason,
                    s.cancelled,
                    timestamp(&s.created_at),
                    s.started_at.as_ref().map(timestamp),
                    s.completed_at.as_ref().map(timestamp),
                ],
            )
            .map_err(db_err("insert scan"))?;
            debug!(scan_id = %s.id, "scan row inserted");
            Ok(())
        })
        .await
    }

    async fn update_scan(&self, scan: &Scan) -> Result<()> {
        let s = scan.clone();
        self.call("update scan", move |conn| update_scan_row(conn, &s)).await
    }

    async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>> {
        let id = scan_id.to_string();
        self.call("get scan", move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS),
                    [id],
                    ScanRow::from_row,
                )
                .optional()
                .map_err(db_err("get scan"))?;
            row.map(ScanRow::into_scan).transpose()
        })
        .await
    }

    async fn list_scans(&self) -> Result<Vec<Scan>> {
        self.call("list scans", |conn| {
            query_scans(
                conn,
                &format!("SELECT {} FROM scans ORDER BY created_at DESC, seq DESC", SCAN_COLUMNS),
            )
        })
        .await
    }

    async fn unfinished_scans(&self) -> Result<Vec<Scan>> {
        self.call("list unfinished scans", |conn| {
            query_scans(
                conn,
                &format!(
                    "SELECT {} FROM scans WHERE status IN ('queued', 'running') ORDER BY seq",
                    SCAN_COLUMNS
                ),
            )
        })
        .await
    }

    async fn delete_scan(&self, scan_id: &str) -> Result<bool> {
        let id = scan_id.to_string();
        self.call("delete scan", move |conn| {
            let tx = conn.transaction().map_err(db_err("begin transaction"))?;
            tx.execute("DELETE FROM findings WHERE scan_id = ?1", [&id])
                .map_err(db_err("delete findings"))?;
            let removed = tx
                .execute("DELETE FROM scans WHERE id = ?1", [&id])
                .map_err(db_err("delete scan"))?;
            tx.commit().map_err(db_err("commit delete"))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn insert_findings(&self, findings: &[Finding]) -> Result<()> {
        let findings = findings.to_vec();
        self.call("insert findings", move |conn| {
            let tx = conn.transaction().map_err(db_err("begin transaction"))?;
            for finding in &findings {
                insert_finding(&tx, finding)?;
            }
            tx.commit().map_err(db_err("commit findings"))?;
            Ok(())
        })
        .await
    }

    async fn findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        let id = scan_id.to_string();
        self.call("list findings", move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM findings WHERE scan_id = ?1 ORDER BY seq",
                    FINDING_COLUMNS
                ))
                .map_err(db_err("prepare findings query"))?;
            let rows = stmt
                .query_map([id], FindingRow::from_row)
                .map_err(db_err("query findings"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("read finding row"))?;
            rows.into_iter().map(FindingRow::into_finding).collect()
        })
        .await
    }

    async fn append_history(&self, entry: &ScoreHistoryEntry) -> Result<()> {
        let entry = entry.clone();
        self.call("append history", move |conn| insert_history(conn, &entry)).await
    }

    async fn history(&self, target: &str) -> Result<Vec<ScoreHistoryEntry>> {
        let target = target.to_string();
        self.call("read history", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT target, scan_id, score, grade, module_scores, scanned_at \
                     FROM score_history WHERE target = ?1 ORDER BY scanned_at, seq",
                )
                .map_err(db_err("prepare history query"))?;
            let rows = stmt
                .query_map([target], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(db_err("query history"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("read history row"))?;

            rows.into_iter()
                .map(|(target, scan_id, score, grade, module_scores, scanned_at)| {
                    Ok(ScoreHistoryEntry {
                        grade: Grade::parse(&grade).ok_or_else(|| bad_column("grade", &grade))?,
                        module_scores: serde_json::from_str(&module_scores)?,
                        scanned_at: parse_timestamp(&scanned_at)?,
                        target,
                        scan_id,
                        score,
                    })
                })
                .collect()
        })
        .await
    }

    /// One transaction: findings, scan row and history land together or not at all
    async fn record_outcome(&self, scan: &Scan, findings: &[Finding]) -> Result<()> {
        let scan = scan.clone();
        let findings = findings.to_vec();
        self.call("record outcome", move |conn| {
            let tx = conn.transaction().map_err(db_err("begin transaction"))?;
            for finding in &findings {
                insert_finding(&tx, finding)?;
            }
            update_scan_row(&tx, &scan)?;
            if let Some(entry) = ScoreHistoryEntry::from_scan(&scan) {
                insert_history(&tx, &entry)?;
            }
            tx.commit().map_err(db_err("commit outcome"))?;
            Ok(())
        })
        .await
    }
}
