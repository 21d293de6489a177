//! Source database readers, the harvest-object store, and the URL cache.

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

mod cache;
mod harvest;
mod source;

pub use cache::{CacheEntry, CacheKey, UrlCache};
pub use harvest::{HarvestJob, HarvestObject, HarvestStore, ObjectError, ObjectState};
pub use source::{
    connect_source, ColumnInfo, ColumnKind, InMemorySource, MySqlSource, SourceError,
    SourceReader,
};

pub const CRATE_NAME: &str = "odgovlt-storage";

/// Fixed-width UTC timestamps so SQLite text comparison orders them correctly.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

pub(crate) async fn open_sqlite(url: &str) -> anyhow::Result<sqlx::SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing sqlite url {url}"))?
        .create_if_missing(true);
    // One long-lived connection: an in-memory database exists per connection.
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .with_context(|| format!("opening sqlite database {url}"))
}
