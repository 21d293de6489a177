//! Typed CKAN action API client.
//!
//! Every action the harvester consumes is a method on [`CatalogApi`]. The HTTP
//! implementation posts JSON to `{base}/api/3/action/{name}` and unwraps CKAN's
//! `{success, result, error}` envelope. Failures are returned as-is; nothing is
//! retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use odgovlt_core::{
    CatalogOrganization, CatalogPackage, CatalogStatus, CatalogUser, MemberRequest,
    NewOrganization, NewPackage, NewUser,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "odgovlt-ckan";

const NOT_FOUND_ERROR_TYPE: &str = "Not Found Error";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{action}: not found: {message}")]
    NotFound { action: String, message: String },
    #[error("{action} rejected ({kind}): {message}")]
    Rejected {
        action: String,
        kind: String,
        message: String,
    },
    #[error("{action}: http status {status}")]
    HttpStatus { action: String, status: u16 },
    #[error("{action}: request failed: {source}")]
    Request {
        action: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{action}: cannot decode response: {source}")]
    Decode {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }
}

/// The CKAN actions used by the harvester.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn status_show(&self) -> Result<CatalogStatus, CatalogError>;

    async fn user_show(&self, id: &str) -> Result<CatalogUser, CatalogError>;
    async fn user_list(&self, q: &str) -> Result<Vec<CatalogUser>, CatalogError>;
    async fn user_create(&self, user: &NewUser) -> Result<CatalogUser, CatalogError>;

    async fn organization_show(&self, id: &str) -> Result<CatalogOrganization, CatalogError>;
    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<CatalogOrganization, CatalogError>;
    async fn organization_member_create(&self, member: &MemberRequest) -> Result<(), CatalogError>;

    async fn package_list(&self) -> Result<Vec<String>, CatalogError>;
    async fn package_show(&self, id: &str) -> Result<CatalogPackage, CatalogError>;
    async fn package_create(&self, package: &NewPackage) -> Result<CatalogPackage, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct CkanClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for CkanClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            api_token: None,
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
pub struct CkanClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonValue>,
}

impl CkanClient {
    pub fn new(config: CkanClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(token)
                .context("CKAN API token is not a valid header value")?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{}", self.base_url, action)
    }

    async fn call<P, R>(&self, action: &str, params: &P) -> Result<R, CatalogError>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.action_url(action);
        let span = info_span!("ckan_action", action, %url);
        async {
            let response = self
                .client
                .post(&url)
                .json(params)
                .send()
                .await
                .map_err(|source| CatalogError::Request {
                    action: action.to_string(),
                    source,
                })?;
            let status = response.status();
            let body = response.bytes().await.map_err(|source| CatalogError::Request {
                action: action.to_string(),
                source,
            })?;
            debug!(status = status.as_u16(), bytes = body.len(), "ckan action response");
            decode_action_response(action, status, &body)
        }
        .instrument(span)
        .await
    }
}

/// Unwraps a CKAN action response body into its `result`.
pub fn decode_action_response<R: DeserializeOwned>(
    action: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<R, CatalogError> {
    let envelope: ActionEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(source) => {
            if status.is_success() {
                return Err(CatalogError::Decode {
                    action: action.to_string(),
                    source,
                });
            }
            if status == StatusCode::NOT_FOUND {
                return Err(CatalogError::NotFound {
                    action: action.to_string(),
                    message: "action endpoint returned 404".to_string(),
                });
            }
            return Err(CatalogError::HttpStatus {
                action: action.to_string(),
                status: status.as_u16(),
            });
        }
    };

    if envelope.success {
        let result = envelope.result.unwrap_or(JsonValue::Null);
        return serde_json::from_value(result).map_err(|source| CatalogError::Decode {
            action: action.to_string(),
            source,
        });
    }

    let (kind, message) = describe_error(envelope.error.as_ref());
    if kind == NOT_FOUND_ERROR_TYPE || (kind.is_empty() && status == StatusCode::NOT_FOUND) {
        return Err(CatalogError::NotFound {
            action: action.to_string(),
            message,
        });
    }
    if kind.is_empty() && !status.is_success() {
        return Err(CatalogError::HttpStatus {
            action: action.to_string(),
            status: status.as_u16(),
        });
    }
    Err(CatalogError::Rejected {
        action: action.to_string(),
        kind,
        message,
    })
}

fn describe_error(error: Option<&JsonValue>) -> (String, String) {
    let Some(JsonValue::Object(fields)) = error else {
        return (String::new(), error.map(JsonValue::to_string).unwrap_or_default());
    };
    let kind = fields
        .get("__type")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let message = match fields.get("message").and_then(JsonValue::as_str) {
        Some(message) => message.to_string(),
        // Validation errors carry per-field lists instead of a message.
        None => fields
            .iter()
            .filter(|(key, _)| key.as_str() != "__type")
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("; "),
    };
    (kind, message)
}

#[async_trait]
impl CatalogApi for CkanClient {
    async fn status_show(&self) -> Result<CatalogStatus, CatalogError> {
        self.call("status_show", &json!({})).await
    }

    async fn user_show(&self, id: &str) -> Result<CatalogUser, CatalogError> {
        self.call("user_show", &json!({ "id": id })).await
    }

    async fn user_list(&self, q: &str) -> Result<Vec<CatalogUser>, CatalogError> {
        self.call("user_list", &json!({ "q": q })).await
    }

    async fn user_create(&self, user: &NewUser) -> Result<CatalogUser, CatalogError> {
        self.call("user_create", user).await
    }

    async fn organization_show(&self, id: &str) -> Result<CatalogOrganization, CatalogError> {
        self.call("organization_show", &json!({ "id": id })).await
    }

    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<CatalogOrganization, CatalogError> {
        self.call("organization_create", organization).await
    }

    async fn organization_member_create(&self, member: &MemberRequest) -> Result<(), CatalogError> {
        let _member: JsonValue = self.call("organization_member_create", member).await?;
        Ok(())
    }

    async fn package_list(&self) -> Result<Vec<String>, CatalogError> {
        self.call("package_list", &json!({})).await
    }

    async fn package_show(&self, id: &str) -> Result<CatalogPackage, CatalogError> {
        self.call("package_show", &json!({ "id": id })).await
    }

    async fn package_create(&self, package: &NewPackage) -> Result<CatalogPackage, CatalogError> {
        self.call("package_create", package).await
    }
}
