//! Legacy `rinkmenos` rows and their typed per-table views.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

/// Column names used by the mappers.
pub mod columns {
    pub const ID: &str = "ID";
    pub const TITLE: &str = "PAVADINIMAS";
    pub const NOTES: &str = "SANTRAUKA";
    pub const KEYWORDS: &str = "R_ZODZIAI";
    pub const CONTACT_EMAIL: &str = "K_EMAIL";
    pub const WEB_PAGE: &str = "TINKLAPIS";
    pub const CODE: &str = "KODAS";
    pub const ADDRESS: &str = "ADRESAS";
    pub const USER_ID: &str = "USER_ID";
    pub const ORGANIZATION_ID: &str = "istaiga_id";
    pub const LOGIN: &str = "LOGIN";
    pub const EMAIL: &str = "EMAIL";
    pub const PASSWORD: &str = "PASS";
    pub const FIRST_NAME: &str = "FIRST_NAME";
    pub const LAST_NAME: &str = "LAST_NAME";
}

pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    /// Date-time column holding a value chrono cannot represent, e.g. `0000-00-00 00:00:00`.
    InvalidDateTime(String),
}

impl SourceValue {
    /// Parses MySQL `DATE`/`DATETIME`/`TIMESTAMP` text.
    pub fn parse_datetime(raw: &str) -> Self {
        let raw = raw.trim();
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
                return SourceValue::DateTime(dt);
            }
        }
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            Some(dt) => SourceValue::DateTime(dt),
            None => SourceValue::InvalidDateTime(raw.to_string()),
        }
    }

    fn describe(&self) -> String {
        match self {
            SourceValue::Null => "null".to_string(),
            SourceValue::Int(v) => format!("integer {v}"),
            SourceValue::Float(v) => format!("float {v}"),
            SourceValue::Text(v) => format!("text {v:?}"),
            SourceValue::DateTime(v) => format!("datetime {v}"),
            SourceValue::InvalidDateTime(v) => format!("invalid datetime {v:?}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("column {column} is missing or empty")]
    Missing { column: String },
    #[error("column {column} holds {found}, expected {expected}")]
    Invalid {
        column: String,
        expected: &'static str,
        found: String,
    },
    #[error("staged row is not a JSON object")]
    NotAnObject,
}

/// One record from a legacy table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: BTreeMap<String, SourceValue>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: SourceValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: SourceValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SourceValue> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SourceValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Text value of a column; numbers are rendered, null and absent columns are `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.columns.get(column)? {
            SourceValue::Null | SourceValue::InvalidDateTime(_) => None,
            SourceValue::Int(v) => Some(v.to_string()),
            SourceValue::Float(v) => Some(v.to_string()),
            SourceValue::Text(v) => Some(v.clone()),
            SourceValue::DateTime(v) => Some(v.format(ISO_DATETIME_FORMAT).to_string()),
        }
    }

    pub fn required_text(&self, column: &str) -> Result<String, RowError> {
        self.text(column)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RowError::Missing {
                column: column.to_string(),
            })
    }

    pub fn int(&self, column: &str) -> Result<Option<i64>, RowError> {
        let invalid = |value: &SourceValue| RowError::Invalid {
            column: column.to_string(),
            expected: "integer",
            found: value.describe(),
        };
        match self.columns.get(column) {
            None | Some(SourceValue::Null) => Ok(None),
            Some(SourceValue::Int(v)) => Ok(Some(*v)),
            Some(value @ SourceValue::Float(v)) => {
                if v.fract() == 0.0 && v.is_finite() {
                    Ok(Some(*v as i64))
                } else {
                    Err(invalid(value))
                }
            }
            Some(value @ SourceValue::Text(v)) => {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    trimmed.parse().map(Some).map_err(|_| invalid(value))
                }
            }
            Some(value) => Err(invalid(value)),
        }
    }

    pub fn required_int(&self, column: &str) -> Result<i64, RowError> {
        self.int(column)?.ok_or_else(|| RowError::Missing {
            column: column.to_string(),
        })
    }

    pub fn id(&self) -> Result<i64, RowError> {
        self.required_int(columns::ID)
    }

    /// Rebuilds a row from staged JSON content.
    pub fn from_json(value: &JsonValue) -> Result<Self, RowError> {
        let object = value.as_object().ok_or(RowError::NotAnObject)?;
        let mut row = SourceRow::new();
        for (column, value) in object {
            let value = match value {
                JsonValue::Null => SourceValue::Null,
                JsonValue::Bool(b) => SourceValue::Int(i64::from(*b)),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => SourceValue::Int(i),
                    None => SourceValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                JsonValue::String(s) => SourceValue::Text(s.clone()),
                other => SourceValue::Text(other.to_string()),
            };
            row.insert(column.clone(), value);
        }
        Ok(row)
    }
}

/// Renders a date-time as `%Y-%m-%dT%H:%M:%S`, or `null` outside years 1..=9999.
pub fn encode_datetime(value: &NaiveDateTime) -> JsonValue {
    if (1..=9999).contains(&value.year()) {
        JsonValue::String(value.format(ISO_DATETIME_FORMAT).to_string())
    } else {
        JsonValue::Null
    }
}

/// Encodes every column of a row as a JSON object for staging.
pub fn encode_source_row(row: &SourceRow) -> JsonValue {
    let mut object = Map::with_capacity(row.len());
    for (column, value) in row.columns() {
        let encoded = match value {
            SourceValue::Null | SourceValue::InvalidDateTime(_) => JsonValue::Null,
            SourceValue::Int(v) => JsonValue::Number((*v).into()),
            SourceValue::Float(v) => Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SourceValue::Text(v) => JsonValue::String(v.clone()),
            SourceValue::DateTime(v) => encode_datetime(v),
        };
        object.insert(column.to_string(), encoded);
    }
    JsonValue::Object(object)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserRow {
    pub fn fullname(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TryFrom<&SourceRow> for UserRow {
    type Error = RowError;

    fn try_from(row: &SourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id()?,
            login: row.required_text(columns::LOGIN)?,
            email: row.text(columns::EMAIL),
            password: row.text(columns::PASSWORD),
            first_name: row.text(columns::FIRST_NAME),
            last_name: row.text(columns::LAST_NAME),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRow {
    pub id: i64,
    pub title: String,
    pub code: Option<String>,
    pub address: Option<String>,
}

impl TryFrom<&SourceRow> for OrganizationRow {
    type Error = RowError;

    fn try_from(row: &SourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id()?,
            title: row.required_text(columns::TITLE)?,
            code: row.text(columns::CODE),
            address: row.text(columns::ADDRESS),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: i64,
    pub title: String,
    pub notes: Option<String>,
    pub web_page: Option<String>,
    pub contact_email: Option<String>,
    pub keywords: Option<String>,
    pub code: Option<String>,
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
}

impl TryFrom<&SourceRow> for DatasetRow {
    type Error = RowError;

    fn try_from(row: &SourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id()?,
            title: row.required_text(columns::TITLE)?,
            notes: row.text(columns::NOTES),
            web_page: row.text(columns::WEB_PAGE),
            contact_email: row.text(columns::CONTACT_EMAIL),
            keywords: row.text(columns::KEYWORDS),
            code: row.text(columns::CODE),
            user_id: row.int(columns::USER_ID)?,
            organization_id: row.int(columns::ORGANIZATION_ID)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn dates_in_range_encode_as_iso_strings() {
        assert_eq!(encode_datetime(&dt(1977, 2, 19)), json!("1977-02-19T00:00:00"));
        assert_eq!(encode_datetime(&dt(3089, 8, 1)), json!("3089-08-01T00:00:00"));
        assert_eq!(encode_datetime(&dt(1900, 9, 30)), json!("1900-09-30T00:00:00"));
    }

    #[test]
    fn unrenderable_dates_encode_as_null() {
        assert_eq!(encode_datetime(&dt(0, 1, 1)), JsonValue::Null);
        assert_eq!(
            SourceValue::parse_datetime("0000-00-00 00:00:00"),
            SourceValue::InvalidDateTime("0000-00-00 00:00:00".to_string())
        );

        let row = SourceRow::new()
            .with("ID", SourceValue::Int(7))
            .with("SUKURTA", SourceValue::parse_datetime("0000-00-00 00:00:00"))
            .with("ATNAUJINTA", SourceValue::parse_datetime("2014-05-06 07:08:09"))
            .with("PAVADINIMAS", SourceValue::Text("Duomenys".into()));
        assert_eq!(
            encode_source_row(&row),
            json!({
                "ID": 7,
                "SUKURTA": null,
                "ATNAUJINTA": "2014-05-06T07:08:09",
                "PAVADINIMAS": "Duomenys",
            })
        );
    }

    #[test]
    fn staged_json_decodes_into_dataset_row() {
        let staged = json!({
            "ID": 12,
            "PAVADINIMAS": "Oro kokybė",
            "SANTRAUKA": "Matavimai",
            "R_ZODZIAI": "oras; kokybė",
            "USER_ID": "3",
            "istaiga_id": null,
            "KODAS": 1001,
        });
        let row = SourceRow::from_json(&staged).unwrap();
        let dataset = DatasetRow::try_from(&row).unwrap();
        assert_eq!(dataset.id, 12);
        assert_eq!(dataset.title, "Oro kokybė");
        assert_eq!(dataset.user_id, Some(3));
        assert_eq!(dataset.organization_id, None);
        assert_eq!(dataset.code.as_deref(), Some("1001"));
        assert_eq!(dataset.web_page, None);
    }

    #[test]
    fn missing_id_and_bad_integers_are_row_errors() {
        let row = SourceRow::new().with("PAVADINIMAS", SourceValue::Text("x".into()));
        assert_eq!(
            DatasetRow::try_from(&row),
            Err(RowError::Missing { column: "ID".into() })
        );

        let row = row
            .with("ID", SourceValue::Int(1))
            .with("USER_ID", SourceValue::Text("abc".into()));
        assert!(matches!(
            DatasetRow::try_from(&row),
            Err(RowError::Invalid { ref column, .. }) if column == "USER_ID"
        ));

        assert_eq!(SourceRow::from_json(&json!([1, 2])), Err(RowError::NotAnObject));
    }

    #[test]
    fn fullname_joins_present_parts() {
        let user = UserRow {
            id: 1,
            login: "jonas".into(),
            email: None,
            password: None,
            first_name: Some("Jonas".into()),
            last_name: Some("Jonaitis".into()),
        };
        assert_eq!(user.fullname(), "Jonas Jonaitis");
        let user = UserRow {
            last_name: None,
            ..user
        };
        assert_eq!(user.fullname(), "Jonas");
    }
}
