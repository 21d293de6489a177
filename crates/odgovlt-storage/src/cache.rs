use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::{format_timestamp, open_sqlite, parse_timestamp};

/// Cache lookups accept either the row id or the URL itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    Id(i64),
    Url(String),
}

impl From<i64> for CacheKey {
    fn from(id: i64) -> Self {
        CacheKey::Id(id)
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        CacheKey::Url(url.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(url: String) -> Self {
        CacheKey::Url(url)
    }
}

impl FromStr for CacheKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(id) => CacheKey::Id(id),
            Err(_) => CacheKey::Url(s.to_string()),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Id(id) => write!(f, "#{id}"),
            CacheKey::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub id: i64,
    pub url: String,
    pub date_accessed: DateTime<Utc>,
    pub cached_forever: bool,
}

/// Local record of previously seen source URLs.
#[derive(Debug, Clone)]
pub struct UrlCache {
    pool: SqlitePool,
}

impl UrlCache {
    pub async fn open(url: &str) -> Result<Self> {
        let pool = open_sqlite(url).await?;
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'data'",
        )
        .fetch_optional(&pool)
        .await
        .context("inspecting cache schema")?;
        if existing.is_some() {
            debug!("cache table already exists");
        } else {
            sqlx::query(
                r#"
                CREATE TABLE data (
                    id INTEGER PRIMARY KEY,
                    url VARCHAR(40) UNIQUE,
                    date_accessed TEXT NOT NULL,
                    cached_forever BOOLEAN NOT NULL DEFAULT 0
                )
                "#,
            )
            .execute(&pool)
            .await
            .context("creating cache table")?;
        }
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    pub async fn contains(&self, key: impl Into<CacheKey>) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Records a URL as accessed now. A URL already present is left unchanged.
    pub async fn update(&self, url: &str, cached_forever: bool) -> Result<()> {
        self.insert_accessed_at(url, cached_forever, Utc::now()).await
    }

    async fn insert_accessed_at(
        &self,
        url: &str,
        cached_forever: bool,
        accessed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO data (url, date_accessed, cached_forever) VALUES (?, ?, ?)",
        )
        .bind(url)
        .bind(format_timestamp(accessed_at))
        .bind(cached_forever)
        .execute(&self.pool)
        .await
        .with_context(|| format!("caching {url}"))?;
        Ok(())
    }

    pub async fn get(&self, key: impl Into<CacheKey>) -> Result<Option<CacheEntry>> {
        let query = match key.into() {
            CacheKey::Id(id) => {
                sqlx::query("SELECT id, url, date_accessed, cached_forever FROM data WHERE id = ?")
                    .bind(id)
            }
            CacheKey::Url(url) => {
                sqlx::query("SELECT id, url, date_accessed, cached_forever FROM data WHERE url = ?")
                    .bind(url)
            }
        };
        let row = query
            .fetch_optional(&self.pool)
            .await
            .context("reading cache entry")?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn get_all(&self) -> Result<Vec<CacheEntry>> {
        let rows =
            sqlx::query("SELECT id, url, date_accessed, cached_forever FROM data ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .context("reading cache entries")?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Drops entries last accessed more than `days` ago unless cached forever.
    pub async fn remove_old(&self, days: i64) -> Result<u64> {
        if days < 0 {
            bail!("cache age must not be negative, got {days} days");
        }
        let cutoff = Duration::try_days(days).and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            bail!("cache age of {days} days is out of range");
        };
        let result =
            sqlx::query("DELETE FROM data WHERE date_accessed < ? AND cached_forever = 0")
                .bind(format_timestamp(cutoff))
                .execute(&self.pool)
                .await
                .context("evicting old cache entries")?;
        Ok(result.rows_affected())
    }

    /// Drops every entry that is not cached forever.
    pub async fn reset(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM data WHERE cached_forever = 0")
            .execute(&self.pool)
            .await
            .context("resetting cache")?;
        Ok(result.rows_affected())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry> {
    Ok(CacheEntry {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        date_accessed: parse_timestamp(&row.try_get::<String, _>("date_accessed")?)?,
        cached_forever: row.try_get("cached_forever")?,
    })
}
