#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use odgovlt_ckan::{CatalogApi, CatalogError};
use odgovlt_core::{
    CatalogOrganization, CatalogPackage, CatalogStatus, CatalogUser, Extra, MemberRequest,
    NewOrganization, NewPackage, NewUser, SOURCE_ID_KEY,
};
use odgovlt_sync::SyncOptions;

pub fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/rinkmenos/sample.json")
}

pub fn fixture_url() -> String {
    format!("fixture://{}", fixture_path().display())
}

pub fn options() -> SyncOptions {
    SyncOptions {
        importbot: "importbot".to_string(),
        importbot_email: "importbot@data.gov.lt".to_string(),
        placeholder_password: "placeholder".to_string(),
    }
}

#[derive(Debug, Default)]
struct State {
    users: Vec<CatalogUser>,
    organizations: Vec<CatalogOrganization>,
    packages: Vec<CatalogPackage>,
    created_users: Vec<NewUser>,
    created_organizations: Vec<NewOrganization>,
    created_packages: Vec<NewPackage>,
    members: Vec<MemberRequest>,
    failing_packages: HashSet<String>,
}

/// In-memory catalog that records every write it receives.
#[derive(Debug, Default)]
pub struct RecordingCatalog {
    state: Mutex<State>,
}

impl RecordingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = format!("user-{}", state.users.len() + 1);
            state.users.push(CatalogUser {
                id,
                name: name.to_string(),
                fullname: None,
                email: None,
                sysadmin: false,
            });
        }
        self
    }

    /// Seeds a package that was imported by an earlier run.
    pub fn with_imported_package(self, name: &str, source_id: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = format!("package-{}", state.packages.len() + 1);
            state.packages.push(CatalogPackage {
                id,
                name: name.to_string(),
                title: None,
                extras: vec![Extra::new(SOURCE_ID_KEY, source_id)],
            });
        }
        self
    }

    /// Makes `package_create` reject packages with this name.
    pub fn failing_package(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_packages
            .insert(name.to_string());
        self
    }

    pub fn created_users(&self) -> Vec<NewUser> {
        self.state.lock().unwrap().created_users.clone()
    }

    pub fn created_organizations(&self) -> Vec<NewOrganization> {
        self.state.lock().unwrap().created_organizations.clone()
    }

    pub fn created_packages(&self) -> Vec<NewPackage> {
        self.state.lock().unwrap().created_packages.clone()
    }

    pub fn members(&self) -> Vec<MemberRequest> {
        self.state.lock().unwrap().members.clone()
    }
}

fn not_found(action: &'static str, id: &str) -> CatalogError {
    CatalogError::NotFound {
        action: action.to_string(),
        message: format!("{id} not found"),
    }
}

#[async_trait]
impl CatalogApi for RecordingCatalog {
    async fn status_show(&self) -> Result<CatalogStatus, CatalogError> {
        Ok(CatalogStatus {
            ckan_version: "2.9.9".to_string(),
            site_url: "http://catalog.test".to_string(),
            site_title: None,
            extensions: Vec::new(),
        })
    }

    async fn user_show(&self, id: &str) -> Result<CatalogUser, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|user| user.name == id || user.id == id)
            .cloned()
            .ok_or_else(|| not_found("user_show", id))
    }

    async fn user_list(&self, q: &str) -> Result<Vec<CatalogUser>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|user| user.name.contains(q))
            .cloned()
            .collect())
    }

    async fn user_create(&self, user: &NewUser) -> Result<CatalogUser, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if user.email.is_none() || user.password.is_none() {
            return Err(CatalogError::Rejected {
                action: "user_create".to_string(),
                kind: "Validation Error".to_string(),
                message: "email: Missing value; password: Missing value".to_string(),
            });
        }
        let created = CatalogUser {
            id: format!("user-{}", state.users.len() + 1),
            name: user.name.clone(),
            fullname: user.fullname.clone(),
            email: user.email.clone(),
            sysadmin: false,
        };
        state.users.push(created.clone());
        state.created_users.push(user.clone());
        Ok(created)
    }

    async fn organization_show(&self, id: &str) -> Result<CatalogOrganization, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .organizations
            .iter()
            .find(|organization| organization.name == id)
            .cloned()
            .ok_or_else(|| not_found("organization_show", id))
    }

    async fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<CatalogOrganization, CatalogError> {
        let mut state = self.state.lock().unwrap();
        let created = CatalogOrganization {
            id: format!("organization-{}", state.organizations.len() + 1),
            name: organization.name.clone(),
            title: Some(organization.title.clone()),
        };
        state.organizations.push(created.clone());
        state.created_organizations.push(organization.clone());
        Ok(created)
    }

    async fn organization_member_create(&self, member: &MemberRequest) -> Result<(), CatalogError> {
        self.state.lock().unwrap().members.push(member.clone());
        Ok(())
    }

    async fn package_list(&self) -> Result<Vec<String>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state.packages.iter().map(|package| package.name.clone()).collect())
    }

    async fn package_show(&self, id: &str) -> Result<CatalogPackage, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .packages
            .iter()
            .find(|package| package.name == id || package.id == id)
            .cloned()
            .ok_or_else(|| not_found("package_show", id))
    }

    async fn package_create(&self, package: &NewPackage) -> Result<CatalogPackage, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_packages.contains(&package.name) {
            return Err(CatalogError::Rejected {
                action: "package_create".to_string(),
                kind: "Validation Error".to_string(),
                message: "name: That URL is already in use.".to_string(),
            });
        }
        let created = CatalogPackage {
            id: format!("package-{}", state.packages.len() + 1),
            name: package.name.clone(),
            title: Some(package.title.clone()),
            extras: package.extras.clone(),
        };
        state.packages.push(created.clone());
        state.created_packages.push(package.clone());
        Ok(created)
    }
}
