use std::collections::HashMap;

use anyhow::{Context, Result};
use odgovlt_ckan::CatalogApi;
use odgovlt_core::{
    get_package_tags, slugify, tables, CatalogPackage, CatalogUser, DatasetRow, Extra,
    MemberRequest, NewOrganization, NewPackage, NewUser, OrganizationRow, SourceRow, UserRow,
    ADDRESS_KEY, CODE_KEY, SOURCE_ID_KEY,
};
use odgovlt_storage::SourceReader;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::SyncOptions;

/// Name used for both the fallback user and the fallback organization.
pub const UNKNOWN_NAME: &str = "unknown";

const ACTIVE: &str = "active";
const EDITOR_ROLE: &str = "editor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub fullname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedOrganization {
    pub id: String,
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOutcome {
    Created(CatalogPackage),
    AlreadyImported(CatalogPackage),
}

impl DatasetOutcome {
    pub fn package(&self) -> &CatalogPackage {
        match self {
            DatasetOutcome::Created(package) | DatasetOutcome::AlreadyImported(package) => package,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub rows: usize,
    pub created: Vec<String>,
    pub already_imported: usize,
}

/// Catalog packages keyed by the legacy `ID` stored in their extras.
#[derive(Debug, Clone, Default)]
pub struct ExistingDatasets {
    by_source_id: HashMap<i64, CatalogPackage>,
}

impl ExistingDatasets {
    pub fn get(&self, source_id: i64) -> Option<&CatalogPackage> {
        self.by_source_id.get(&source_id)
    }

    pub fn insert(&mut self, source_id: i64, package: CatalogPackage) {
        self.by_source_id.insert(source_id, package);
    }

    pub fn len(&self) -> usize {
        self.by_source_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source_id.is_empty()
    }
}

pub fn user_payload(user: Option<&UserRow>, placeholder_password: &str) -> NewUser {
    match user {
        Some(user) => NewUser {
            name: user.login.clone(),
            email: user.email.clone(),
            // Legacy hashes are passed through untouched.
            password: user.password.clone(),
            fullname: Some(user.fullname()),
        },
        None => NewUser {
            name: UNKNOWN_NAME.to_string(),
            email: Some("unknown@example.com".to_string()),
            password: Some(placeholder_password.to_string()),
            fullname: Some("Unknown User".to_string()),
        },
    }
}

pub fn organization_payload(organization: Option<&OrganizationRow>) -> NewOrganization {
    match organization {
        Some(organization) => {
            let mut extras = vec![Extra::new(SOURCE_ID_KEY, organization.id.to_string())];
            if let Some(code) = &organization.code {
                extras.push(Extra::new(CODE_KEY, code.clone()));
            }
            if let Some(address) = &organization.address {
                extras.push(Extra::new(ADDRESS_KEY, address.clone()));
            }
            NewOrganization {
                name: slugify(&organization.title),
                title: organization.title.clone(),
                state: ACTIVE.to_string(),
                extras,
            }
        }
        None => NewOrganization {
            name: UNKNOWN_NAME.to_string(),
            title: "Unknown organization".to_string(),
            state: ACTIVE.to_string(),
            extras: Vec::new(),
        },
    }
}

pub fn package_payload(
    dataset: &DatasetRow,
    user: &ResolvedUser,
    organization: &ResolvedOrganization,
) -> NewPackage {
    let mut extras = vec![Extra::new(SOURCE_ID_KEY, dataset.id.to_string())];
    if let Some(code) = &dataset.code {
        extras.push(Extra::new(CODE_KEY, code.clone()));
    }
    NewPackage {
        name: slugify(&dataset.title),
        title: dataset.title.clone(),
        notes: dataset.notes.clone(),
        url: dataset.web_page.clone(),
        maintainer: Some(user.fullname.clone()).filter(|name| !name.is_empty()),
        maintainer_email: dataset.contact_email.clone(),
        owner_org: organization.name.clone(),
        tags: get_package_tags(dataset.keywords.as_deref()).to_vec(),
        private: false,
        state: ACTIVE.to_string(),
        package_type: "dataset".to_string(),
        extras,
    }
}

/// Pushes legacy users, organizations, and datasets into one catalog.
pub struct CkanSync<'a, A: CatalogApi + ?Sized> {
    api: &'a A,
    source: &'a dyn SourceReader,
    importbot: CatalogUser,
    placeholder_password: String,
}

impl<'a, A: CatalogApi + ?Sized> CkanSync<'a, A> {
    pub async fn new(
        api: &'a A,
        source: &'a dyn SourceReader,
        options: &SyncOptions,
    ) -> Result<Self> {
        let importbot = sync_importbot_user(api, options).await?;
        Ok(Self {
            api,
            source,
            importbot,
            placeholder_password: options.placeholder_password.clone(),
        })
    }

    pub fn importbot(&self) -> &CatalogUser {
        &self.importbot
    }

    pub async fn sync_user(&self, user_id: Option<i64>) -> Result<ResolvedUser> {
        let source_user = match user_id {
            Some(id) => self
                .source
                .find_user(id)
                .await
                .with_context(|| format!("looking up source user {id}"))?,
            None => None,
        };
        if source_user.is_none() {
            debug!(?user_id, "source user missing, using placeholder");
        }
        let payload = user_payload(source_user.as_ref(), &self.placeholder_password);

        let existing = self
            .api
            .user_list(&payload.name)
            .await
            .with_context(|| format!("searching catalog users for {}", payload.name))?
            .into_iter()
            .find(|user| user.name == payload.name);

        let catalog_user = match existing {
            Some(user) => user,
            None => {
                info!(user = %payload.name, "creating catalog user");
                self.api
                    .user_create(&payload)
                    .await
                    .with_context(|| format!("creating catalog user {}", payload.name))?
            }
        };

        Ok(ResolvedUser {
            id: catalog_user.id,
            name: payload.name,
            email: payload.email,
            fullname: payload.fullname.unwrap_or_default(),
        })
    }

    pub async fn sync_organization(
        &self,
        organization_id: Option<i64>,
    ) -> Result<ResolvedOrganization> {
        let source_organization = match organization_id {
            Some(id) => self
                .source
                .find_organization(id)
                .await
                .with_context(|| format!("looking up source organization {id}"))?,
            None => None,
        };
        let payload = organization_payload(source_organization.as_ref());

        let catalog_organization = match self.api.organization_show(&payload.name).await {
            Ok(organization) => organization,
            Err(err) if err.is_not_found() => {
                info!(organization = %payload.name, "creating catalog organization");
                self.api
                    .organization_create(&payload)
                    .await
                    .with_context(|| format!("creating catalog organization {}", payload.name))?
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("looking up catalog organization {}", payload.name))
            }
        };

        Ok(ResolvedOrganization {
            id: catalog_organization.id,
            name: payload.name,
            title: payload.title,
        })
    }

    /// Scans every catalog package once and indexes those carrying a source ID.
    pub async fn existing_datasets(&self) -> Result<ExistingDatasets> {
        let mut existing = ExistingDatasets::default();
        let names = self.api.package_list().await.context("listing catalog packages")?;
        for name in names {
            let package = self
                .api
                .package_show(&name)
                .await
                .with_context(|| format!("loading catalog package {name}"))?;
            let Some(raw) = package.extra(SOURCE_ID_KEY) else {
                continue;
            };
            match raw.trim().parse::<i64>() {
                Ok(source_id) => existing.insert(source_id, package),
                Err(_) => warn!(package = %name, value = raw, "ignoring non-numeric source id"),
            }
        }
        debug!(count = existing.len(), "indexed imported packages");
        Ok(existing)
    }

    /// Resolves owner user and organization, grants membership, and creates the
    /// package unless its source ID is already in the catalog.
    pub async fn sync_dataset(
        &self,
        dataset: &DatasetRow,
        existing: &mut ExistingDatasets,
    ) -> Result<DatasetOutcome> {
        let user = self.sync_user(dataset.user_id).await?;
        let organization = self.sync_organization(dataset.organization_id).await?;

        self.api
            .organization_member_create(&MemberRequest {
                id: organization.name.clone(),
                username: user.name.clone(),
                role: EDITOR_ROLE.to_string(),
            })
            .await
            .with_context(|| format!("adding {} to {}", user.name, organization.name))?;

        if let Some(package) = existing.get(dataset.id) {
            debug!(source_id = dataset.id, package = %package.name, "already imported");
            return Ok(DatasetOutcome::AlreadyImported(package.clone()));
        }

        let payload = package_payload(dataset, &user, &organization);
        let package = self
            .api
            .package_create(&payload)
            .await
            .with_context(|| {
                format!("creating package {} for source id {}", payload.name, dataset.id)
            })?;
        info!(source_id = dataset.id, package = %package.name, "created package");
        existing.insert(dataset.id, package.clone());
        Ok(DatasetOutcome::Created(package))
    }

    pub async fn sync_datasets(&self) -> Result<SyncReport> {
        let mut existing = self.existing_datasets().await?;
        let rows = self
            .source
            .rows(tables::DATASET)
            .await
            .context("reading source datasets")?;

        // Rows are mapped one at a time so a malformed row stops the run
        // only after the rows before it were synced.
        let mut report = SyncReport::default();
        for row in &rows {
            let dataset = DatasetRow::try_from(row).with_context(|| {
                format!("mapping {} row {}", tables::DATASET, describe_row(row))
            })?;
            report.rows += 1;
            match self.sync_dataset(&dataset, &mut existing).await? {
                DatasetOutcome::Created(package) => report.created.push(package.name),
                DatasetOutcome::AlreadyImported(_) => report.already_imported += 1,
            }
        }
        info!(
            rows = report.rows,
            created = report.created.len(),
            already_imported = report.already_imported,
            "dataset sync finished"
        );
        Ok(report)
    }
}

fn describe_row(row: &SourceRow) -> String {
    row.id()
        .map(|id| id.to_string())
        .unwrap_or_else(|_| "without ID".to_string())
}

/// The catalog requires an email and a password on `user_create`.
pub fn importbot_payload(options: &SyncOptions) -> NewUser {
    NewUser {
        name: options.importbot.clone(),
        email: Some(options.importbot_email.clone()),
        password: Some(options.placeholder_password.clone()),
        fullname: Some("Import bot".to_string()),
    }
}

// Creating organizations needs sysadmin rights, which the API token must carry.
async fn sync_importbot_user<A: CatalogApi + ?Sized>(
    api: &A,
    options: &SyncOptions,
) -> Result<CatalogUser> {
    let name = options.importbot.as_str();
    match api.user_show(name).await {
        Ok(user) => Ok(user),
        Err(err) if err.is_not_found() => {
            info!(user = name, "creating importbot user");
            api.user_create(&importbot_payload(options))
                .await
                .with_context(|| format!("creating importbot user {name}"))
        }
        Err(err) => Err(err).with_context(|| format!("looking up importbot user {name}")),
    }
}
