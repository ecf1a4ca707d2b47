use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One row per completed chat request, append-only.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub model: String,
    pub role: String,
    pub conversation_id: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub response_time_ms: i64,
}

/// Append-only usage log backed by SQLite.
#[derive(Clone)]
pub struct UsageTracker {
    pool: SqlitePool,
}

impl UsageTracker {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_home(path.as_ref());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    pub async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage (
                timestamp, backend, model, role, conversation_id,
                prompt_tokens, completion_tokens, total_tokens, response_time_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.timestamp)
        .bind(&record.backend)
        .bind(&record.model)
        .bind(&record.role)
        .bind(&record.conversation_id)
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens)
        .bind(record.response_time_ms)
        .execute(&self.pool)
        .await
        .context("Failed to insert usage record")?;

        Ok(())
    }

    /// Total tokens spent through a backend since the start of this month.
    pub async fn monthly_usage(&self, backend: &str) -> Result<i64> {
        let now = Utc::now();
        let start_of_month = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .context("Failed to compute start of month")?;

        let row = sqlx::query(
            "SELECT COALESCE(SUM(total_tokens), 0) AS total
             FROM usage WHERE backend = ? AND timestamp >= ?",
        )
        .bind(backend)
        .bind(start_of_month)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    /// Token totals grouped by role.
    pub async fn usage_by_role(
        &self,
        backend: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT role, SUM(total_tokens) AS total
             FROM usage WHERE backend = ? AND timestamp >= ?
             GROUP BY role",
        )
        .bind(backend)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("role"), r.get("total")))
            .collect())
    }

    pub async fn average_response_time(
        &self,
        backend: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT AVG(response_time_ms) AS avg_ms
             FROM usage WHERE backend = ? AND timestamp >= ?",
        )
        .bind(backend)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let avg: Option<f64> = row.get("avg_ms");
        Ok(avg.unwrap_or(0.0) as i64)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
