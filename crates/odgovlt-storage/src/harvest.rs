use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::{format_timestamp, open_sqlite, parse_timestamp};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS harvest_jobs (
        id TEXT PRIMARY KEY,
        source_url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS harvest_objects (
        id TEXT PRIMARY KEY,
        guid TEXT NOT NULL,
        job_id TEXT NOT NULL REFERENCES harvest_jobs(id),
        content TEXT NOT NULL,
        state TEXT NOT NULL,
        package_id TEXT,
        created_at TEXT NOT NULL,
        imported_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS harvest_object_errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        object_id TEXT NOT NULL REFERENCES harvest_objects(id),
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectState {
    Gathered,
    Complete,
    Error,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Gathered => "GATHERED",
            ObjectState::Complete => "COMPLETE",
            ObjectState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GATHERED" => Ok(ObjectState::Gathered),
            "COMPLETE" => Ok(ObjectState::Complete),
            "ERROR" => Ok(ObjectState::Error),
            other => Err(anyhow!("unknown harvest object state {other:?}")),
        }
    }
}

/// A staged source row waiting for (or done with) import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestObject {
    pub id: Uuid,
    pub guid: String,
    pub job_id: Uuid,
    pub content: String,
    pub state: ObjectState,
    pub package_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectError {
    pub object_id: Uuid,
    pub guid: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store for harvest jobs, staged objects, and import errors.
#[derive(Debug, Clone)]
pub struct HarvestStore {
    pool: SqlitePool,
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("parsing uuid {raw:?}"))
}

fn optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

impl HarvestStore {
    pub async fn open(url: &str) -> Result<Self> {
        let pool = open_sqlite(url).await?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("creating harvest tables")?;
        }
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    pub async fn create_job(&self, source_url: &str) -> Result<HarvestJob> {
        let job = HarvestJob {
            id: Uuid::new_v4(),
            source_url: source_url.to_string(),
            created_at: Utc::now(),
            finished_at: None,
        };
        sqlx::query("INSERT INTO harvest_jobs (id, source_url, created_at) VALUES (?, ?, ?)")
            .bind(job.id.to_string())
            .bind(&job.source_url)
            .bind(format_timestamp(job.created_at))
            .execute(&self.pool)
            .await
            .context("inserting harvest job")?;
        Ok(job)
    }

    pub async fn finish_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE harvest_jobs SET finished_at = ? WHERE id = ?")
            .bind(format_timestamp(Utc::now()))
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .context("finishing harvest job")?;
        Ok(())
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Option<HarvestJob>> {
        let row = sqlx::query(
            "SELECT id, source_url, created_at, finished_at FROM harvest_jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("loading harvest job")?;

        row.map(|row| -> Result<HarvestJob> {
            Ok(HarvestJob {
                id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                source_url: row.try_get("source_url")?,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                finished_at: optional_timestamp(row.try_get("finished_at")?)?,
            })
        })
        .transpose()
    }

    /// Stages one source row; returns the new object id.
    pub async fn save_object(&self, guid: &str, job_id: Uuid, content: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO harvest_objects (id, guid, job_id, content, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(guid)
        .bind(job_id.to_string())
        .bind(content)
        .bind(ObjectState::Gathered.as_str())
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("staging harvest object {guid}"))?;
        Ok(id)
    }

    pub async fn object(&self, id: Uuid) -> Result<Option<HarvestObject>> {
        let row = sqlx::query(
            r#"
            SELECT id, guid, job_id, content, state, package_id, created_at, imported_at
              FROM harvest_objects
             WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("loading harvest object")?;
        row.as_ref().map(object_from_row).transpose()
    }

    pub async fn objects_for_job(&self, job_id: Uuid) -> Result<Vec<HarvestObject>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guid, job_id, content, state, package_id, created_at, imported_at
              FROM harvest_objects
             WHERE job_id = ?
             ORDER BY created_at, rowid
            "#,
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("listing harvest objects")?;
        rows.iter().map(object_from_row).collect()
    }

    pub async fn mark_complete(&self, id: Uuid, package_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE harvest_objects SET state = ?, package_id = ?, imported_at = ? WHERE id = ?",
        )
        .bind(ObjectState::Complete.as_str())
        .bind(package_id)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("completing harvest object")?;
        Ok(())
    }

    /// Marks the object failed and appends the message to its error log.
    pub async fn record_error(&self, id: Uuid, message: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        sqlx::query("UPDATE harvest_objects SET state = ?, imported_at = ? WHERE id = ?")
            .bind(ObjectState::Error.as_str())
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("failing harvest object")?;
        sqlx::query(
            "INSERT INTO harvest_object_errors (object_id, message, created_at) VALUES (?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(message)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("inserting harvest object error")?;
        tx.commit().await.context("committing harvest object error")?;
        Ok(())
    }

    pub async fn errors_for_job(&self, job_id: Uuid) -> Result<Vec<ObjectError>> {
        let rows = sqlx::query(
            r#"
            SELECT e.object_id, o.guid, e.message, e.created_at
              FROM harvest_object_errors e
              JOIN harvest_objects o ON o.id = e.object_id
             WHERE o.job_id = ?
             ORDER BY e.id
            "#,
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("listing harvest object errors")?;

        rows.iter()
            .map(|row| -> Result<ObjectError> {
                Ok(ObjectError {
                    object_id: parse_uuid(&row.try_get::<String, _>("object_id")?)?,
                    guid: row.try_get("guid")?,
                    message: row.try_get("message")?,
                    created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

fn object_from_row(row: &SqliteRow) -> Result<HarvestObject> {
    Ok(HarvestObject {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        guid: row.try_get("guid")?,
        job_id: parse_uuid(&row.try_get::<String, _>("job_id")?)?,
        content: row.try_get("content")?,
        state: row.try_get::<String, _>("state")?.parse()?,
        package_id: row.try_get("package_id")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        imported_at: optional_timestamp(row.try_get("imported_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_objects_round_trip_through_states() {
        let store = HarvestStore::open_in_memory().await.unwrap();
        let job = store.create_job("fixture://sample.json").await.unwrap();
        assert_eq!(store.job(job.id).await.unwrap().unwrap().source_url, "fixture://sample.json");

        let first = store.save_object("100", job.id, r#"{"ID":100}"#).await.unwrap();
        let second = store.save_object("101", job.id, r#"{"ID":101}"#).await.unwrap();

        let staged = store.object(first).await.unwrap().unwrap();
        assert_eq!(staged.state, ObjectState::Gathered);
        assert_eq!(staged.content, r#"{"ID":100}"#);

        store.mark_complete(first, Some("pkg-1")).await.unwrap();
        store.record_error(second, "organization_create rejected").await.unwrap();

        let objects = store.objects_for_job(job.id).await.unwrap();
        assert_eq!(objects.len(), 2);
        let done = objects.iter().find(|o| o.id == first).unwrap();
        assert_eq!(done.state, ObjectState::Complete);
        assert_eq!(done.package_id.as_deref(), Some("pkg-1"));

        let errors = store.errors_for_job(job.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].guid, "101");
        assert_eq!(
            store.object(second).await.unwrap().unwrap().state,
            ObjectState::Error
        );

        store.finish_job(job.id).await.unwrap();
        assert!(store.job(job.id).await.unwrap().unwrap().finished_at.is_some());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("harvest.db").display());
        let job_id = {
            let store = HarvestStore::open(&url).await.unwrap();
            store.create_job("mysql://root@localhost/rinkmenos").await.unwrap().id
        };
        let store = HarvestStore::open(&url).await.unwrap();
        assert!(store.job(job_id).await.unwrap().is_some());
    }
}
