use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deadpool::managed::Object;
use libsql::{Row, params};
use monitor::{CheckOutcome, ResultSink, Target, TargetId, TargetRegistry, TargetSpec};
use uuid::Uuid;

use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str = "id, name, url, method, expected_statuses, timeout_ms, interval_s, \
                              retries, backoff_s, headers, enabled, severity";

const OUTCOME_COLUMNS: &str = "target_id, checked_at, ok, status, latency_ms, error";

/// Target registry and result sink backed by libsql
pub struct SqlStore {
    pool: LibsqlPool,
}

impl SqlStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn select_targets(&self, filter: &str) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {TARGET_COLUMNS} FROM targets {filter} ORDER BY name, id");
        let mut rows = conn.query(&sql, ()).await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(row_to_target(&row)?);
        }
        Ok(targets)
    }
}

/// Fixed precision keeps text order equal to time order
fn format_checked_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_target(row: &Row) -> Result<Target> {
    let id: String = row.get(0)?;
    let expected_statuses: String = row.get(4)?;
    let headers: Option<String> = row.get(9)?;

    let spec = TargetSpec {
        name: row.get(1)?,
        url: row.get(2)?,
        method: row.get(3)?,
        expected_statuses: serde_json::from_str(&expected_statuses)
            .with_context(|| format!("malformed expected_statuses for target {id}"))?,
        timeout_ms: u64::try_from(row.get::<i64>(5)?)?,
        interval_s: u64::try_from(row.get::<i64>(6)?)?,
        retries: u32::try_from(row.get::<i64>(7)?)?,
        backoff_s: row.get(8)?,
        headers: headers
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("malformed headers for target {id}"))?,
        enabled: row.get::<i64>(10)? != 0,
        severity: row.get(11)?,
    };

    Ok(Target::with_id(Uuid::parse_str(&id)?, spec))
}

fn row_to_outcome(row: &Row) -> Result<CheckOutcome> {
    let target_id: String = row.get(0)?;
    let checked_at: String = row.get(1)?;

    Ok(CheckOutcome {
        target_id: Uuid::parse_str(&target_id)?,
        checked_at: DateTime::parse_from_rfc3339(&checked_at)?.with_timezone(&Utc),
        ok: row.get::<i64>(2)? != 0,
        status: row.get::<Option<i64>>(3)?.map(u16::try_from).transpose()?,
        latency_ms: u64::try_from(row.get::<i64>(4)?)?,
        error: row.get(5)?,
    })
}

/// Target columns that need encoding before they can be bound
struct TargetRow {
    expected_statuses: String,
    headers: Option<String>,
    timeout_ms: i64,
    interval_s: i64,
}

impl TargetRow {
    fn encode(spec: &TargetSpec) -> Result<Self> {
        Ok(Self {
            expected_statuses: serde_json::to_string(&spec.expected_statuses)?,
            headers: spec.headers.as_ref().map(serde_json::to_string).transpose()?,
            timeout_ms: i64::try_from(spec.timeout_ms)?,
            interval_s: i64::try_from(spec.interval_s)?,
        })
    }
}

#[async_trait]
impl TargetRegistry for SqlStore {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        self.select_targets("").await
    }

    async fn list_enabled_targets(&self) -> Result<Vec<Target>> {
        self.select_targets("WHERE enabled = 1").await
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_target(&row)?)),
            None => Ok(None),
        }
    }

    async fn add_target(&self, target: &Target) -> Result<()> {
        let conn = self.get_conn().await?;
        let spec = &target.spec;
        let encoded = TargetRow::encode(spec)?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO targets (id, name, url, method, expected_statuses, timeout_ms, interval_s, retries, backoff_s, headers, enabled, severity, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                target.id.to_string(),
                spec.name.clone(),
                spec.url.clone(),
                spec.method.clone(),
                encoded.expected_statuses,
                encoded.timeout_ms,
                encoded.interval_s,
                i64::from(spec.retries),
                spec.backoff_s,
                encoded.headers,
                if spec.enabled { 1 } else { 0 },
                spec.severity.clone(),
                now,
                now
            ],
        )
        .await
        .with_context(|| format!("failed to insert target {}", target.id))?;

        Ok(())
    }

    async fn update_target(&self, target: &Target) -> Result<bool> {
        let conn = self.get_conn().await?;
        let spec = &target.spec;
        let encoded = TargetRow::encode(spec)?;

        let changed = conn
            .execute(
                "UPDATE targets SET name = ?, url = ?, method = ?, expected_statuses = ?, timeout_ms = ?, interval_s = ?, retries = ?, backoff_s = ?, headers = ?, enabled = ?, severity = ?, updated_at = ? WHERE id = ?",
                params![
                    spec.name.clone(),
                    spec.url.clone(),
                    spec.method.clone(),
                    encoded.expected_statuses,
                    encoded.timeout_ms,
                    encoded.interval_s,
                    i64::from(spec.retries),
                    spec.backoff_s,
                    encoded.headers,
                    if spec.enabled { 1 } else { 0 },
                    spec.severity.clone(),
                    Utc::now().timestamp(),
                    target.id.to_string()
                ],
            )
            .await?;

        Ok(changed > 0)
    }

    async fn remove_target(&self, id: TargetId) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        // Results go with their target
        tx.execute("DELETE FROM check_results WHERE target_id = ?", params![id.to_string()])
            .await?;
        let removed = tx.execute("DELETE FROM targets WHERE id = ?", params![id.to_string()]).await?;

        tx.commit().await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl ResultSink for SqlStore {
    async fn record(&self, outcome: &CheckOutcome) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO check_results (target_id, checked_at, ok, status, latency_ms, error) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                outcome.target_id.to_string(),
                format_checked_at(outcome.checked_at),
                if outcome.ok { 1 } else { 0 },
                outcome.status.map(i64::from),
                i64::try_from(outcome.latency_ms).unwrap_or(i64::MAX),
                outcome.error.clone()
            ],
        )
        .await?;

        Ok(())
    }

    async fn last_outcome(&self, target_id: TargetId) -> Result<Option<CheckOutcome>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {OUTCOME_COLUMNS} FROM check_results WHERE target_id = ? \
             ORDER BY checked_at DESC, id DESC LIMIT 1"
        );
        let mut rows = conn.query(&sql, params![target_id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_outcome(&row)?)),
            None => Ok(None),
        }
    }
}
