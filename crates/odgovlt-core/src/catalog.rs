//! CKAN action payloads and results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Extras key holding the legacy `ID`; its presence marks a package as imported.
pub const SOURCE_ID_KEY: &str = "Šaltinio ID";
pub const CODE_KEY: &str = "Kodas";
pub const ADDRESS_KEY: &str = "Adresas";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    pub key: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl Extra {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub fn find_extra<'a>(extras: &'a [Extra], key: &str) -> Option<&'a str> {
    extras
        .iter()
        .find(|extra| extra.key == key)
        .map(|extra| extra.value.as_str())
}

fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sysadmin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrganization {
    pub name: String,
    pub title: String,
    pub state: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<Extra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogOrganization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRequest {
    /// Organization id or name.
    pub id: String,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPackage {
    pub name: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer_email: Option<String>,
    pub owner_org: String,
    pub tags: Vec<Tag>,
    pub private: bool,
    pub state: String,
    #[serde(rename = "type")]
    pub package_type: String,
    pub extras: Vec<Extra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPackage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extras: Vec<Extra>,
}

impl CatalogPackage {
    pub fn extra(&self, key: &str) -> Option<&str> {
        find_extra(&self.extras, key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStatus {
    pub ckan_version: String,
    pub site_url: String,
    #[serde(default)]
    pub site_title: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}
