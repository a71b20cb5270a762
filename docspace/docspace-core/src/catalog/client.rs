use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CatalogQuery, CatalogService, UploadFile, UploadRejection};
use crate::error::{BatchReport, Result, WorkspaceError};
use crate::model::{Addressing, Connectivity, Entry, EntryKind, FolderRef, Location, Project};
use crate::session::SessionProvider;

/// Result of a batched upload: accepted entries in input order plus the
/// files the service refused.
#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    /// `(input index, entry)` for every accepted file.
    pub accepted: Vec<(usize, Entry)>,
    pub failures: Vec<UploadRejection>,
}

impl UploadOutcome {
    pub fn entries(&self) -> Vec<Entry> {
        self.accepted.iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn report(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for (_, entry) in &self.accepted {
            report.succeed(entry.id.clone());
        }
        for failure in &self.failures {
            report.fail(failure.index.to_string(), failure.name.clone(), &failure.reason);
        }
        report
    }
}

/// Translates locations into catalog requests and normalizes every failure
/// into [`WorkspaceError`]. Owns the registry of known projects.
pub struct RemoteCatalogClient {
    service: Arc<dyn CatalogService>,
    session: Arc<dyn SessionProvider>,
    projects: Mutex<HashMap<String, Project>>,
}

impl RemoteCatalogClient {
    pub fn new(service: Arc<dyn CatalogService>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            service,
            session,
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_project(&self, project: Project) {
        self.projects.lock().insert(project.id.clone(), project);
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        self.projects.lock().get(id).cloned()
    }

    pub fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.lock().values().cloned().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        projects
    }

    pub fn session_active(&self) -> bool {
        self.session.is_authenticated() && self.session.current_token().is_some()
    }

    fn token(&self) -> Result<String> {
        if !self.session.is_authenticated() {
            return Err(WorkspaceError::Unauthenticated);
        }
        self.session
            .current_token()
            .filter(|t| !t.is_empty())
            .ok_or(WorkspaceError::Unauthenticated)
    }

    /// Storage root of a project, fetched once from the catalog when missing.
    pub async fn resolve_project_root(&self, project_id: &str) -> Result<String> {
        let project = self
            .project(project_id)
            .ok_or_else(|| WorkspaceError::UnknownProject(project_id.to_string()))?;
        if let Some(root) = project.remote_folder_path.filter(|r| !r.is_empty()) {
            return Ok(root);
        }

        let token = self.token()?;
        debug!("Project {} has no root, fetching project record", project_id);
        let record = self.service.get_project(&token, project_id).await?;
        match record.remote_folder_path.filter(|r| !r.is_empty()) {
            Some(root) => {
                if let Some(project) = self.projects.lock().get_mut(project_id) {
                    project.remote_folder_path = Some(root.clone());
                }
                Ok(root)
            }
            None => {
                warn!("Project {} still has no remote folder path", project_id);
                Err(WorkspaceError::NotConfigured {
                    project: project_id.to_string(),
                })
            }
        }
    }

    async fn query_for(&self, location: &Location) -> Result<CatalogQuery> {
        let mut query = CatalogQuery::category(location.category());
        match location.category().addressing() {
            Addressing::ById => {
                query.folder_uuid = location.segments().last().and_then(|s| match &s.folder {
                    FolderRef::Id(id) => Some(id.clone()),
                    FolderRef::Path(_) => None,
                });
            }
            Addressing::ByPath => {
                let project_id = location.project_id().ok_or_else(|| {
                    WorkspaceError::InvalidLocation("project location without project id".to_string())
                })?;
                let root = self.resolve_project_root(project_id).await?;
                let mut path = root.trim_end_matches('/').to_string();
                for segment in location.segments() {
                    if let FolderRef::Path(fragment) = &segment.folder {
                        path.push('/');
                        path.push_str(fragment);
                    }
                }
                query.project_id = Some(project_id.to_string());
                query.folder_path = Some(path);
            }
            Addressing::Local => {
                return Err(WorkspaceError::InvalidLocation(
                    "trash is kept locally and has no catalog listing".to_string(),
                ));
            }
        }
        Ok(query)
    }

    pub async fn list(&self, location: &Location) -> Result<Vec<Entry>> {
        let token = self.token()?;
        let query = self.query_for(location).await?;
        let key = location.key();
        let entries: Vec<Entry> = self
            .service
            .list(&token, &query)
            .await?
            .into_iter()
            .map(|remote| remote.into_entry(&key))
            .collect();
        debug!("Listed {} entries at {}", entries.len(), key);
        Ok(entries)
    }

    pub async fn create_folder(&self, location: &Location, name: &str) -> Result<Entry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkspaceError::Rejected("folder name is empty".to_string()));
        }
        let token = self.token()?;
        let query = self.query_for(location).await?;
        let remote = self.service.create_folder(&token, &query, name).await?;
        let mut entry = remote.into_entry(&location.key());
        entry.kind = EntryKind::Folder;
        info!("Created folder {} at {}", entry.name, location);
        Ok(entry)
    }

    /// Upload every file in a single catalog call.
    pub async fn upload(&self, location: &Location, files: &[UploadFile]) -> Result<UploadOutcome> {
        if files.is_empty() {
            return Ok(UploadOutcome::default());
        }
        let token = self.token()?;
        let query = self.query_for(location).await?;
        let response = self.service.upload(&token, &query, files).await?;

        let rejected: HashSet<usize> = response.errors.iter().map(|r| r.index).collect();
        let accepted_indices: Vec<usize> = (0..files.len()).filter(|i| !rejected.contains(i)).collect();
        let key = location.key();
        let mut failures = response.errors;

        if accepted_indices.len() == response.files.len() {
            let accepted = accepted_indices
                .into_iter()
                .zip(response.files)
                .map(|(i, remote)| (i, remote.into_entry(&key)))
                .collect();
            return Ok(UploadOutcome { accepted, failures });
        }

        // Positions are unreliable once counts differ; pair by name instead.
        warn!(
            "Upload response has {} files for {} accepted inputs",
            response.files.len(),
            accepted_indices.len()
        );
        let mut pending = accepted_indices;
        let mut accepted = Vec::with_capacity(pending.len());
        for remote in response.files {
            match pending.iter().position(|&i| files[i].name == remote.name) {
                Some(pos) => {
                    let index = pending.remove(pos);
                    accepted.push((index, remote.into_entry(&key)));
                }
                None => warn!("Upload response lists unknown file {}", remote.name),
            }
        }
        failures.extend(pending.into_iter().map(|index| UploadRejection {
            index,
            name: files[index].name.clone(),
            reason: "missing from upload response".to_string(),
        }));
        accepted.sort_by_key(|(i, _)| *i);
        failures.sort_by_key(|f| f.index);
        Ok(UploadOutcome { accepted, failures })
    }

    /// Probe a project's storage root and record the result on the project.
    pub async fn check_connectivity(&self, project_id: &str) -> Result<Connectivity> {
        if self.project(project_id).is_none() {
            return Err(WorkspaceError::UnknownProject(project_id.to_string()));
        }

        let connectivity = if !self.session_active() {
            Connectivity::unknown("not signed in")
        } else {
            match self.list(&Location::project(project_id)).await {
                Ok(entries) => Connectivity::connected(Some(entries.len())),
                Err(WorkspaceError::NotFound(_)) => Connectivity::disconnected("root not found"),
                Err(WorkspaceError::Unauthorized(_)) => Connectivity {
                    last_error: Some("auth required".to_string()),
                    ..Connectivity::connected(None)
                },
                Err(err @ WorkspaceError::NotConfigured { .. }) => {
                    Connectivity::disconnected(err.to_string())
                }
                Err(err) => Connectivity::unknown(err.to_string()),
            }
        };

        info!("Project {} connectivity: {:?}", project_id, connectivity.connected);
        if let Some(project) = self.projects.lock().get_mut(project_id) {
            project.connectivity = connectivity.clone();
        }
        Ok(connectivity)
    }

    /// Check every registered project; the probes run concurrently on the
    /// calling task.
    pub async fn check_all_connectivity(&self) -> Vec<(String, Connectivity)> {
        let ids: Vec<String> = self.projects().into_iter().map(|p| p.id).collect();
        let probes = ids.iter().map(|id| async move {
            let connectivity = self
                .check_connectivity(id)
                .await
                .unwrap_or_else(|e| Connectivity::unknown(e.to_string()));
            (id.clone(), connectivity)
        });
        join_all(probes).await
    }
}
