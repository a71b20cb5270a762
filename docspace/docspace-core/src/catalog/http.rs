use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{CatalogQuery, CatalogService, ProjectRecord, RemoteEntry, ServiceError, UploadFile, UploadResponse};

/// Catalog service reached over HTTP+JSON with bearer authentication.
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Serialize)]
struct CreateFolderBody<'a> {
    name: &'a str,
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_folder_uuid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_path: Option<&'a str>,
}

fn transport(err: reqwest::Error) -> ServiceError {
    ServiceError::Transport(err.to_string())
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, token: &str) -> Result<T, ServiceError> {
        let response = request.bearer_auth(token).send().await.map_err(transport)?;
        let response = check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

/// Turn a non-success response into [`ServiceError::Status`], preferring a
/// `{"detail": ...}` body over raw text.
async fn check(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.detail,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };
    debug!("Catalog answered {}: {}", status, message);
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CatalogService for HttpCatalog {
    async fn list(&self, token: &str, query: &CatalogQuery) -> Result<Vec<RemoteEntry>, ServiceError> {
        let request = self.client.get(self.url("/documents")).query(query);
        self.send(request, token).await
    }

    async fn create_folder(
        &self,
        token: &str,
        query: &CatalogQuery,
        name: &str,
    ) -> Result<RemoteEntry, ServiceError> {
        let body = CreateFolderBody {
            name,
            category: &query.category,
            project_id: query.project_id.as_deref(),
            parent_folder_uuid: query.folder_uuid.as_deref(),
            folder_path: query.folder_path.as_deref(),
        };
        let request = self.client.post(self.url("/documents/folders")).json(&body);
        self.send(request, token).await
    }

    async fn upload(
        &self,
        token: &str,
        query: &CatalogQuery,
        files: &[UploadFile],
    ) -> Result<UploadResponse, ServiceError> {
        let mut form = Form::new().text("category", query.category.clone());
        if let Some(project_id) = &query.project_id {
            form = form.text("project_id", project_id.clone());
        }
        if let Some(uuid) = &query.folder_uuid {
            form = form.text("parent_folder_uuid", uuid.clone());
        }
        if let Some(path) = &query.folder_path {
            form = form.text("folder_path", path.clone());
        }
        for file in files {
            let part = Part::bytes(file.data.to_vec())
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)
                .map_err(transport)?;
            form = form.part("files", part);
        }
        let request = self.client.post(self.url("/documents/upload")).multipart(form);
        self.send(request, token).await
    }

    async fn get_project(&self, token: &str, project_id: &str) -> Result<ProjectRecord, ServiceError> {
        let request = self.client.get(self.url(&format!("/projects/{}", project_id)));
        self.send(request, token).await
    }
}
