//! Remote document catalog: the service seam, its wire types and the client
//! that normalizes both addressing schemes.

mod client;
mod http;
mod memory;

pub use client::{RemoteCatalogClient, UploadOutcome};
pub use http::HttpCatalog;
pub use memory::{CatalogOp, InMemoryCatalog};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::model::{Category, ContentRef, Entry, EntryKind};

/// Addressing parameters of one catalog request.
///
/// At most one of `folder_uuid` and `folder_path` is ever set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogQuery {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
}

impl CatalogQuery {
    pub fn category(category: Category) -> Self {
        Self {
            category: category.as_str().to_string(),
            ..Default::default()
        }
    }
}

/// Entry as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl RemoteEntry {
    pub fn file(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EntryKind::File,
            size,
            last_modified: Some(Utc::now()),
            owner: None,
            url: None,
            mime_type: None,
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Folder,
            ..Self::file(id, name, 0)
        }
    }

    pub fn into_entry(self, location_key: &str) -> Entry {
        let content = self.url.map(|url| ContentRef::Remote {
            url,
            mime_type: self
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        });
        Entry {
            id: self.id,
            name: self.name,
            kind: self.kind,
            size: self.size,
            last_modified: self.last_modified.unwrap_or_else(Utc::now),
            owner: self.owner.unwrap_or_default(),
            path: location_key.to_string(),
            original_path: None,
            deleted_at: None,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// A file the service refused, by position in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRejection {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// Accepted files in request order, minus the rejected indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub files: Vec<RemoteEntry>,
    #[serde(default)]
    pub errors: Vec<UploadRejection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    #[serde(default)]
    pub remote_folder_path: Option<String>,
}

/// Raw failure of a [`CatalogService`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl From<ServiceError> for WorkspaceError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Status { status, message } => WorkspaceError::from_status(status, message),
            ServiceError::Transport(msg) => WorkspaceError::Transport(msg),
            ServiceError::Decode(msg) => WorkspaceError::Transport(format!("invalid response: {}", msg)),
        }
    }
}

/// Backend document catalog.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list(&self, token: &str, query: &CatalogQuery) -> Result<Vec<RemoteEntry>, ServiceError>;

    async fn create_folder(
        &self,
        token: &str,
        query: &CatalogQuery,
        name: &str,
    ) -> Result<RemoteEntry, ServiceError>;

    async fn upload(
        &self,
        token: &str,
        query: &CatalogQuery,
        files: &[UploadFile],
    ) -> Result<UploadResponse, ServiceError>;

    async fn get_project(&self, token: &str, project_id: &str) -> Result<ProjectRecord, ServiceError>;
}
