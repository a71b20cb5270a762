//! Byte sources for entry content: transient local handles and remote URLs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::model::ContentRef;
use crate::session::SessionProvider;

/// Resolves a [`ContentRef`] to its bytes.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn fetch(&self, content: &ContentRef) -> Result<Bytes>;
}

/// Process-local blobs, e.g. freshly uploaded files the catalog returned no
/// URL for. Handles do not survive a restart.
#[derive(Default)]
pub struct LocalBlobs {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl LocalBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, data: Bytes) -> ContentRef {
        let handle = Uuid::new_v4().to_string();
        self.blobs.write().insert(handle.clone(), data);
        ContentRef::Local { handle }
    }

    pub fn get(&self, handle: &str) -> Option<Bytes> {
        self.blobs.read().get(handle).cloned()
    }

    pub fn release(&self, content: &ContentRef) {
        if let ContentRef::Local { handle } = content {
            self.blobs.write().remove(handle);
        }
    }
}

#[async_trait]
impl ContentResolver for LocalBlobs {
    async fn fetch(&self, content: &ContentRef) -> Result<Bytes> {
        match content {
            ContentRef::Local { handle } => self
                .get(handle)
                .ok_or_else(|| anyhow!("local content {} is no longer available", handle)),
            ContentRef::Remote { url, .. } => Err(anyhow!("cannot fetch remote content {}", url)),
        }
    }
}

/// Fetches remote URLs with the session's bearer token; local handles are
/// served from [`LocalBlobs`].
pub struct HttpContentResolver {
    client: reqwest::Client,
    session: Arc<dyn SessionProvider>,
    local: Arc<LocalBlobs>,
}

impl HttpContentResolver {
    pub fn new(session: Arc<dyn SessionProvider>, local: Arc<LocalBlobs>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            session,
            local,
        })
    }
}

#[async_trait]
impl ContentResolver for HttpContentResolver {
    async fn fetch(&self, content: &ContentRef) -> Result<Bytes> {
        let url = match content {
            ContentRef::Local { .. } => return self.local.fetch(content).await,
            ContentRef::Remote { url, .. } => url,
        };
        let mut request = self.client.get(url);
        if let Some(token) = self.session.current_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}
