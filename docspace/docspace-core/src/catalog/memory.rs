use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{
    CatalogQuery, CatalogService, ProjectRecord, RemoteEntry, ServiceError, UploadFile,
    UploadRejection, UploadResponse,
};
use crate::model::Category;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatalogOp {
    List,
    CreateFolder,
    Upload,
    GetProject,
}

#[derive(Default)]
struct State {
    /// "path:<p>" / "uuid:<id>" -> contents; category roots are implicit
    buckets: HashMap<String, Vec<RemoteEntry>>,
    projects: HashMap<String, Option<String>>,
    failures: HashMap<CatalogOp, VecDeque<ServiceError>>,
    rejections: HashMap<String, String>,
    /// accepted on upload but left out of the response
    unreported: HashSet<String>,
    expected_token: Option<String>,
    calls: HashMap<CatalogOp, usize>,
    next_id: u64,
}

/// Deterministic in-process catalog with scripted failures.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

fn bucket_of(query: &CatalogQuery) -> String {
    match (&query.folder_path, &query.folder_uuid) {
        (Some(path), _) => format!("path:{}", path.trim_end_matches('/')),
        (None, Some(uuid)) => format!("uuid:{}", uuid),
        (None, None) => format!("root:{}", query.category),
    }
}

fn not_found(what: &str) -> ServiceError {
    ServiceError::Status {
        status: 404,
        message: format!("{} not found", what),
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an empty storage path.
    pub fn add_root(&self, path: &str) {
        self.state
            .lock()
            .buckets
            .entry(format!("path:{}", path.trim_end_matches('/')))
            .or_default();
    }

    pub fn seed_path(&self, path: &str, entries: Vec<RemoteEntry>) {
        self.state
            .lock()
            .buckets
            .insert(format!("path:{}", path.trim_end_matches('/')), entries);
    }

    pub fn seed_root(&self, category: Category, entries: Vec<RemoteEntry>) {
        self.state
            .lock()
            .buckets
            .insert(format!("root:{}", category.as_str()), entries);
    }

    pub fn seed_folder(&self, uuid: &str, entries: Vec<RemoteEntry>) {
        self.state.lock().buckets.insert(format!("uuid:{}", uuid), entries);
    }

    pub fn set_project(&self, id: &str, remote_folder_path: Option<&str>) {
        self.state
            .lock()
            .projects
            .insert(id.to_string(), remote_folder_path.map(str::to_string));
    }

    /// Fail the next call of `op` with `err`. Queued failures apply in order.
    pub fn fail_next(&self, op: CatalogOp, err: ServiceError) {
        self.state.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn reject_upload(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .rejections
            .insert(name.to_string(), reason.to_string());
    }

    /// Accept uploads of `name` without listing them in the response.
    pub fn omit_from_upload_response(&self, name: &str) {
        self.state.lock().unreported.insert(name.to_string());
    }

    /// Answer 401 to any token other than `token`.
    pub fn expect_token(&self, token: &str) {
        self.state.lock().expected_token = Some(token.to_string());
    }

    pub fn calls(&self, op: CatalogOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn begin(&self, state: &mut State, op: CatalogOp, token: &str) -> Result<(), ServiceError> {
        *state.calls.entry(op).or_default() += 1;
        if let Some(expected) = &state.expected_token {
            if expected != token {
                return Err(ServiceError::Status {
                    status: 401,
                    message: "invalid token".to_string(),
                });
            }
        }
        match state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(state: &mut State, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn list(&self, token: &str, query: &CatalogQuery) -> Result<Vec<RemoteEntry>, ServiceError> {
        let mut state = self.state.lock();
        self.begin(&mut state, CatalogOp::List, token)?;
        let bucket = bucket_of(query);
        match state.buckets.get(&bucket) {
            Some(entries) => Ok(entries.clone()),
            None if bucket.starts_with("root:") => Ok(Vec::new()),
            None => Err(not_found(&bucket)),
        }
    }

    async fn create_folder(
        &self,
        token: &str,
        query: &CatalogQuery,
        name: &str,
    ) -> Result<RemoteEntry, ServiceError> {
        let mut state = self.state.lock();
        self.begin(&mut state, CatalogOp::CreateFolder, token)?;
        let bucket = bucket_of(query);
        if !bucket.starts_with("root:") && !state.buckets.contains_key(&bucket) {
            return Err(not_found(&bucket));
        }
        let siblings = state.buckets.get(&bucket).map(Vec::as_slice).unwrap_or(&[]);
        if siblings.iter().any(|e| e.name == name) {
            return Err(ServiceError::Status {
                status: 422,
                message: format!("{} already exists", name),
            });
        }

        let id = Self::next_id(&mut state, "folder");
        let folder = RemoteEntry::folder(id.clone(), name);
        state.buckets.entry(bucket).or_default().push(folder.clone());
        let child = match &query.folder_path {
            Some(path) => format!("path:{}/{}", path.trim_end_matches('/'), name),
            None => format!("uuid:{}", id),
        };
        state.buckets.entry(child).or_default();
        Ok(folder)
    }

    async fn upload(
        &self,
        token: &str,
        query: &CatalogQuery,
        files: &[UploadFile],
    ) -> Result<UploadResponse, ServiceError> {
        let mut state = self.state.lock();
        self.begin(&mut state, CatalogOp::Upload, token)?;
        let bucket = bucket_of(query);
        if !bucket.starts_with("root:") && !state.buckets.contains_key(&bucket) {
            return Err(not_found(&bucket));
        }

        let mut response = UploadResponse::default();
        let mut seen = HashSet::new();
        for (index, file) in files.iter().enumerate() {
            if let Some(reason) = state.rejections.get(&file.name) {
                response.errors.push(UploadRejection {
                    index,
                    name: file.name.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
            seen.insert(file.name.clone());
            let mut entry = RemoteEntry::file(Self::next_id(&mut state, "file"), &file.name, file.data.len() as u64);
            entry.mime_type = Some(file.mime_type.clone());
            if !state.unreported.contains(&file.name) {
                response.files.push(entry);
            }
        }
        let contents = state.buckets.entry(bucket).or_default();
        contents.retain(|e| !seen.contains(&e.name));
        contents.extend(response.files.iter().cloned());
        Ok(response)
    }

    async fn get_project(&self, token: &str, project_id: &str) -> Result<ProjectRecord, ServiceError> {
        let mut state = self.state.lock();
        self.begin(&mut state, CatalogOp::GetProject, token)?;
        match state.projects.get(project_id) {
            Some(root) => Ok(ProjectRecord {
                id: project_id.to_string(),
                remote_folder_path: root.clone(),
            }),
            None => Err(not_found(&format!("project {}", project_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_and_tokens() {
        let catalog = InMemoryCatalog::new();
        catalog.expect_token("good");
        let query = CatalogQuery::category(Category::Shared);
        assert!(matches!(
            catalog.list("bad", &query).await,
            Err(ServiceError::Status { status: 401, .. })
        ));
        catalog.fail_next(CatalogOp::List, ServiceError::Transport("down".to_string()));
        assert!(catalog.list("good", &query).await.is_err());
        assert!(catalog.list("good", &query).await.unwrap().is_empty());
        assert_eq!(catalog.calls(CatalogOp::List), 3);
    }

    #[tokio::test]
    async fn created_path_folders_become_listable() {
        let catalog = InMemoryCatalog::new();
        catalog.add_root("blob/p1");
        let mut query = CatalogQuery::category(Category::Project);
        query.folder_path = Some("blob/p1".to_string());
        catalog.create_folder("t", &query, "docs").await.unwrap();
        assert!(catalog.create_folder("t", &query, "docs").await.is_err());

        query.folder_path = Some("blob/p1/docs".to_string());
        assert!(catalog.list("t", &query).await.unwrap().is_empty());
        query.folder_path = Some("blob/p1/missing".to_string());
        assert!(catalog.list("t", &query).await.is_err());
    }
}
