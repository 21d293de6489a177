use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use odgovlt_core::{tables, DatasetRow, OrganizationRow, RowError, SourceRow, SourceValue, UserRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported source url {0:?}; expected mysql://… or fixture://…")]
    UnsupportedUrl(String),
    #[error("source database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table {0} does not exist in the source")]
    UnknownTable(String),
    #[error("reading fixture {path}: {source}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing fixture {path}: {source}")]
    FixtureParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{table} row: {source}")]
    Row {
        table: String,
        #[source]
        source: RowError,
    },
}

fn row_error(table: &str) -> impl Fn(RowError) -> SourceError + '_ {
    move |source| SourceError::Row {
        table: table.to_string(),
        source,
    }
}

/// Read access to the legacy tables.
///
/// The typed helpers convert rows at this boundary so column typos surface as
/// [`SourceError::Row`] instead of propagating loosely typed maps.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn rows(&self, table: &str) -> Result<Vec<SourceRow>, SourceError>;

    async fn find_by_id(&self, table: &str, id: i64) -> Result<Option<SourceRow>, SourceError>;

    async fn datasets(&self) -> Result<Vec<(SourceRow, DatasetRow)>, SourceError> {
        self.rows(tables::DATASET)
            .await?
            .into_iter()
            .map(|row| {
                DatasetRow::try_from(&row)
                    .map(|dataset| (row, dataset))
                    .map_err(row_error(tables::DATASET))
            })
            .collect()
    }

    async fn find_user(&self, id: i64) -> Result<Option<UserRow>, SourceError> {
        self.find_by_id(tables::USER, id)
            .await?
            .map(|row| UserRow::try_from(&row).map_err(row_error(tables::USER)))
            .transpose()
    }

    async fn find_organization(&self, id: i64) -> Result<Option<OrganizationRow>, SourceError> {
        self.find_by_id(tables::ORGANIZATION, id)
            .await?
            .map(|row| OrganizationRow::try_from(&row).map_err(row_error(tables::ORGANIZATION)))
            .transpose()
    }
}

/// Opens the reader named by a harvest source URL.
pub async fn connect_source(url: &str) -> Result<Box<dyn SourceReader>, SourceError> {
    if url.starts_with("mysql://") {
        return Ok(Box::new(MySqlSource::connect(url).await?));
    }
    if let Some(path) = url.strip_prefix("fixture://") {
        return Ok(Box::new(InMemorySource::from_fixture_file(path).await?));
    }
    if url.ends_with(".json") {
        return Ok(Box::new(InMemorySource::from_fixture_file(url).await?));
    }
    Err(SourceError::UnsupportedUrl(url.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Decimal,
    DateTime,
    Text,
}

impl ColumnKind {
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                ColumnKind::Integer
            }
            "decimal" | "numeric" | "float" | "double" | "real" => ColumnKind::Decimal,
            "date" | "datetime" | "timestamp" => ColumnKind::DateTime,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Integers come back as `BIGINT`; everything else as text so zero dates and
/// odd decimals never fail to decode.
fn select_expr(column: &ColumnInfo) -> String {
    let ident = quote_ident(&column.name);
    match column.kind {
        ColumnKind::Integer => format!("CAST({ident} AS SIGNED) AS {ident}"),
        _ => format!("CAST({ident} AS CHAR) AS {ident}"),
    }
}

fn select_sql(table: &str, columns: &[ColumnInfo]) -> String {
    let exprs = columns.iter().map(select_expr).collect::<Vec<_>>().join(", ");
    format!("SELECT {exprs} FROM {}", quote_ident(table))
}

fn decode_mysql_row(columns: &[ColumnInfo], row: &MySqlRow) -> Result<SourceRow, sqlx::Error> {
    let mut out = SourceRow::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = match column.kind {
            ColumnKind::Integer => row.try_get::<Option<i64>, _>(idx)?.map(SourceValue::Int),
            kind => {
                let text = match row.try_get::<Option<String>, _>(idx) {
                    Ok(text) => text,
                    Err(_) => row
                        .try_get::<Option<Vec<u8>>, _>(idx)?
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                };
                text.map(|text| match kind {
                    ColumnKind::DateTime => SourceValue::parse_datetime(&text),
                    ColumnKind::Decimal => match text.trim().parse::<f64>() {
                        Ok(v) => SourceValue::Float(v),
                        Err(_) => SourceValue::Text(text),
                    },
                    _ => SourceValue::Text(text),
                })
            }
        };
        out.insert(column.name.clone(), value.unwrap_or(SourceValue::Null));
    }
    Ok(out)
}

/// Read-only MySQL source with columns reflected from `information_schema`.
#[derive(Debug)]
pub struct MySqlSource {
    pool: MySqlPool,
    columns: HashMap<String, Vec<ColumnInfo>>,
}

impl MySqlSource {
    pub async fn connect(url: &str) -> Result<Self, SourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        let mut columns = HashMap::new();
        for table in tables::ALL {
            let reflected = reflect_columns(&pool, table).await?;
            if reflected.is_empty() {
                debug!(table, "table not present in source schema");
            } else {
                columns.insert(table.to_string(), reflected);
            }
        }
        info!(tables = columns.len(), "connected to source database");
        Ok(Self { pool, columns })
    }

    fn table_columns(&self, table: &str) -> Result<&[ColumnInfo], SourceError> {
        self.columns
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| SourceError::UnknownTable(table.to_string()))
    }
}

async fn reflect_columns(pool: &MySqlPool, table: &str) -> Result<Vec<ColumnInfo>, SourceError> {
    let rows = sqlx::query(
        r#"
        SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
               CAST(DATA_TYPE AS CHAR) AS data_type
          FROM information_schema.COLUMNS
         WHERE TABLE_SCHEMA = DATABASE()
           AND TABLE_NAME = ?
         ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        out.push(ColumnInfo {
            name,
            kind: ColumnKind::from_data_type(&data_type),
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceReader for MySqlSource {
    async fn rows(&self, table: &str) -> Result<Vec<SourceRow>, SourceError> {
        let columns = self.table_columns(table)?;
        let rows = sqlx::query(&select_sql(table, columns))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| decode_mysql_row(columns, row).map_err(SourceError::from))
            .collect()
    }

    async fn find_by_id(&self, table: &str, id: i64) -> Result<Option<SourceRow>, SourceError> {
        let columns = self.table_columns(table)?;
        let sql = format!("{} WHERE {} = ?", select_sql(table, columns), quote_ident("ID"));
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|row| decode_mysql_row(columns, &row).map_err(SourceError::from))
            .transpose()
    }
}

/// Source backed by a JSON document of the form `{"t_user": [{…}], …}`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    tables: BTreeMap<String, Vec<SourceRow>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<SourceRow>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    pub fn from_json(value: &JsonValue) -> Result<Self, RowError> {
        let object = value.as_object().ok_or(RowError::NotAnObject)?;
        let mut source = Self::new();
        for (table, rows) in object {
            let rows = rows
                .as_array()
                .map(|rows| rows.iter().map(SourceRow::from_json).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            source = source.with_rows(table, rows);
        }
        Ok(source)
    }

    pub async fn from_fixture_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceError::FixtureIo {
                path: path.to_path_buf(),
                source,
            })?;
        let value: JsonValue =
            serde_json::from_str(&text).map_err(|source| SourceError::FixtureParse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&value).map_err(|source| SourceError::Row {
            table: path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl SourceReader for InMemorySource {
    async fn rows(&self, table: &str) -> Result<Vec<SourceRow>, SourceError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| SourceError::UnknownTable(table.to_string()))
    }

    async fn find_by_id(&self, table: &str, id: i64) -> Result<Option<SourceRow>, SourceError> {
        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| SourceError::UnknownTable(table.to_string()))?;
        Ok(rows.iter().find(|row| row.id().ok() == Some(id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/rinkmenos/sample.json")
    }

    #[test]
    fn select_casts_by_reflected_kind() {
        let columns = vec![
            ColumnInfo {
                name: "ID".into(),
                kind: ColumnKind::from_data_type("int"),
            },
            ColumnInfo {
                name: "SUKURTA".into(),
                kind: ColumnKind::from_data_type("DATETIME"),
            },
            ColumnInfo {
                name: "PAVADINIMAS".into(),
                kind: ColumnKind::from_data_type("varchar"),
            },
        ];
        assert_eq!(
            select_sql("t_rinkmena", &columns),
            "SELECT CAST(`ID` AS SIGNED) AS `ID`, CAST(`SUKURTA` AS CHAR) AS `SUKURTA`, \
             CAST(`PAVADINIMAS` AS CHAR) AS `PAVADINIMAS` FROM `t_rinkmena`"
        );
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[tokio::test]
    async fn fixture_source_finds_typed_rows() {
        let source = InMemorySource::from_fixture_file(fixture_path()).await.unwrap();
        let datasets = source.datasets().await.unwrap();
        assert!(!datasets.is_empty());

        let user = source.find_user(1).await.unwrap().expect("user 1");
        assert_eq!(user.login, "jonaitis");
        assert!(source.find_user(9999).await.unwrap().is_none());

        let organization = source.find_organization(10).await.unwrap().expect("org 10");
        assert_eq!(organization.title, "Aplinkos apsaugos agentūra");
    }

    #[tokio::test]
    async fn unknown_urls_and_tables_are_errors() {
        assert!(matches!(
            connect_source("postgres://localhost/x").await,
            Err(SourceError::UnsupportedUrl(_))
        ));
        let source = InMemorySource::from_json(&json!({ "t_user": [] })).unwrap();
        assert!(matches!(
            source.rows("t_rinkmena").await,
            Err(SourceError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn bad_dataset_rows_name_their_table() {
        let source = InMemorySource::from_json(&json!({
            "t_rinkmena": [{ "PAVADINIMAS": "be ID" }]
        }))
        .unwrap();
        let err = source.datasets().await.unwrap_err();
        assert!(matches!(err, SourceError::Row { ref table, .. } if table == "t_rinkmena"));
    }
}
