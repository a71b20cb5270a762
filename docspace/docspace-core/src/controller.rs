//! The one component the UI shell talks to.
//!
//! Navigation is split in three steps so a shell can keep handling input while
//! a listing is in flight: [`WorkspaceController::begin_navigation`] switches
//! the current location and hands out a ticket,
//! [`WorkspaceController::fetch`] turns the ticket into a future that owns
//! everything it needs, and [`WorkspaceController::apply_listing`] accepts the
//! result only if no newer navigation happened meanwhile. Requests are never
//! cancelled; stale results are dropped.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheUsage, LocalCache};
use crate::catalog::{RemoteCatalogClient, UploadFile, UploadOutcome};
use crate::content::{ContentResolver, LocalBlobs};
use crate::error::{BatchReport, Result, WorkspaceError};
use crate::lifecycle::LifecycleCoordinator;
use crate::model::{Connectivity, Entry, FolderTreeNode, Location, Project, TRASH_KEY};
use crate::notify::NotificationSink;
use crate::selection::{self, BulkAction, DownloadReport, KeyBinding, SelectionSet};
use crate::tree::build_folder_tree;

/// Proof of a navigation; only the latest one is honoured.
#[derive(Debug, Clone)]
pub struct NavigationTicket {
    token: u64,
    location: Location,
}

impl NavigationTicket {
    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// A finished listing request, tagged with its navigation token.
#[derive(Debug)]
pub struct Listing {
    token: u64,
    pub location: Location,
    pub result: Result<Vec<Entry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Applied(usize),
    Stale,
    Failed(WorkspaceError),
}

#[derive(Debug)]
pub enum ActionOutcome {
    Trashed(usize),
    Restored(BatchReport),
    Purged(usize),
    Downloaded(DownloadReport),
    /// Nothing selected, or nothing selected is still listed.
    Skipped,
}

pub struct WorkspaceController {
    catalog: Arc<RemoteCatalogClient>,
    cache: Arc<LocalCache>,
    lifecycle: LifecycleCoordinator,
    content: Arc<dyn ContentResolver>,
    blobs: Arc<LocalBlobs>,
    notifier: Arc<dyn NotificationSink>,
    location: Location,
    entries: Vec<Entry>,
    selection: SelectionSet,
    nav_token: u64,
}

impl WorkspaceController {
    pub fn new(
        catalog: Arc<RemoteCatalogClient>,
        cache: Arc<LocalCache>,
        content: Arc<dyn ContentResolver>,
        blobs: Arc<LocalBlobs>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let location = Location::office();
        Self {
            lifecycle: LifecycleCoordinator::new(cache.clone()),
            selection: SelectionSet::new(location.key()),
            catalog,
            cache,
            content,
            blobs,
            notifier,
            location,
            entries: Vec::new(),
            nav_token: 0,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn current_entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn catalog(&self) -> &RemoteCatalogClient {
        &self.catalog
    }

    /// Switch to `location`, showing its cached entries until a listing lands.
    pub fn begin_navigation(&mut self, location: Location) -> NavigationTicket {
        self.nav_token += 1;
        let key = location.key();
        debug!("Navigation {} to {}", self.nav_token, key);
        self.entries = self.cache.read(&key).unwrap_or_else(|e| {
            warn!("Cached entries for {} unavailable: {}", key, e);
            Vec::new()
        });
        self.selection.rescope(key);
        self.location = location.clone();
        NavigationTicket {
            token: self.nav_token,
            location,
        }
    }

    /// Listing request for a ticket. The future borrows nothing from `self`.
    pub fn fetch(&self, ticket: NavigationTicket) -> impl Future<Output = Listing> + Send + 'static {
        let catalog = self.catalog.clone();
        let cache = self.cache.clone();
        async move {
            let result = if ticket.location.is_trash() {
                cache.read(TRASH_KEY)
            } else {
                catalog.list(&ticket.location).await
            };
            Listing {
                token: ticket.token,
                location: ticket.location,
                result,
            }
        }
    }

    pub fn apply_listing(&mut self, listing: Listing) -> NavigationOutcome {
        if listing.token != self.nav_token {
            debug!(
                "Dropping stale listing {} for {} (current {})",
                listing.token, listing.location, self.nav_token
            );
            return NavigationOutcome::Stale;
        }

        match listing.result {
            Ok(entries) if listing.location.is_trash() => {
                self.entries = entries;
                NavigationOutcome::Applied(self.entries.len())
            }
            Ok(entries) => {
                let trashed: HashSet<String> = self
                    .lifecycle
                    .trash()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| e.id)
                    .collect();
                let entries: Vec<Entry> = entries
                    .into_iter()
                    .filter(|e| !trashed.contains(&e.id))
                    .collect();
                self.persist(&listing.location.key(), &entries);
                self.entries = entries;
                NavigationOutcome::Applied(self.entries.len())
            }
            Err(err) => {
                self.report_listing_error(&listing.location, &err);
                NavigationOutcome::Failed(err)
            }
        }
    }

    pub async fn navigate(&mut self, location: Location) -> NavigationOutcome {
        let ticket = self.begin_navigation(location);
        let listing = self.fetch(ticket).await;
        self.apply_listing(listing)
    }

    fn report_listing_error(&mut self, location: &Location, err: &WorkspaceError) {
        match err {
            WorkspaceError::Unauthenticated => {
                debug!("No session, clearing {}", location);
                self.entries.clear();
            }
            WorkspaceError::Unauthorized(_) => {
                self.notifier.error(format!(
                    "Authorization required to open {}. Sign in again to continue.",
                    location
                ));
            }
            WorkspaceError::NotFound(msg) => {
                self.notifier.warning(format!(
                    "Storage root not found for {}: {}. Check the project configuration.",
                    location, msg
                ));
            }
            WorkspaceError::NotConfigured { .. } => {
                self.entries.clear();
                self.notifier.warning(err.to_string());
            }
            other => {
                self.notifier.error(format!("Could not load {}: {}", location, other));
            }
        }
    }

    /// Notify about an action failure unless it should stay silent.
    fn report_error(&self, action: &str, err: &WorkspaceError) {
        if !err.is_silent() {
            self.notifier.error(format!("{} failed: {}", action, err));
        }
    }

    /// Cache a bucket; quota failures only cost offline availability.
    fn persist(&self, key: &str, entries: &[Entry]) {
        match self.cache.write(key, entries) {
            Ok(receipt) if !receipt.evicted.is_empty() => {
                self.notifier.info(format!(
                    "Removed {} old items from trash to free local space",
                    receipt.evicted.len()
                ));
            }
            Ok(_) => {}
            Err(err @ WorkspaceError::QuotaExceeded { .. }) => {
                warn!("Not caching {}: {}", key, err);
                self.notifier.warning(format!(
                    "Local storage is full; {} will not be available offline",
                    key
                ));
            }
            Err(err) => warn!("Not caching {}: {}", key, err),
        }
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        self.selection.toggle(id)
    }

    pub fn select_all(&mut self) {
        self.selection
            .select_all(self.entries.iter().map(|e| e.id.as_str()));
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn folder_tree(&self, base: &str) -> Vec<FolderTreeNode> {
        build_folder_tree(base, self.cache.location_keys())
    }

    fn merge_into_current(&mut self, incoming: Vec<Entry>) {
        let ids: HashSet<&str> = incoming.iter().map(|e| e.id.as_str()).collect();
        self.entries.retain(|e| !ids.contains(e.id.as_str()));
        self.entries.extend(incoming);
        let key = self.location.key();
        let entries = self.entries.clone();
        self.persist(&key, &entries);
    }

    pub async fn create_folder(&mut self, name: &str) -> Result<Entry> {
        let location = self.location.clone();
        match self.catalog.create_folder(&location, name).await {
            Ok(folder) => {
                self.merge_into_current(vec![folder.clone()]);
                self.notifier.success(format!("Created folder {}", folder.name));
                Ok(folder)
            }
            Err(err) => {
                self.report_error("Creating folder", &err);
                Err(err)
            }
        }
    }

    /// Upload all files in one batch; files the catalog gave no URL are kept
    /// as local blobs so they can still be downloaded.
    pub async fn upload(&mut self, files: Vec<UploadFile>) -> Result<UploadOutcome> {
        let location = self.location.clone();
        let mut outcome = match self.catalog.upload(&location, &files).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_error("Upload", &err);
                return Err(err);
            }
        };

        for (index, entry) in &mut outcome.accepted {
            if entry.content.is_none() {
                if let Some(file) = files.get(*index) {
                    entry.content = Some(self.blobs.store(file.data.clone()));
                }
            }
        }
        self.merge_into_current(outcome.entries());

        let report = outcome.report();
        if report.is_clean() {
            if !report.succeeded.is_empty() {
                self.notifier
                    .success(format!("Uploaded {} files", report.succeeded.len()));
            }
        } else {
            self.notifier.warning(format!("Upload incomplete: {}", report.summary()));
        }
        Ok(outcome)
    }

    pub async fn perform(&mut self, action: BulkAction, selected: &SelectionSet) -> Result<ActionOutcome> {
        let targets = selection::resolve(selected, &self.entries);
        if targets.is_empty() {
            return Ok(ActionOutcome::Skipped);
        }
        let in_trash = self.location.is_trash();
        match action {
            BulkAction::Delete if in_trash => Err(WorkspaceError::InvalidLocation(
                "items in trash can only be restored or deleted permanently".to_string(),
            )),
            BulkAction::Restore | BulkAction::PermanentlyDelete if !in_trash => Err(
                WorkspaceError::InvalidLocation("only items in trash can be restored or purged".to_string()),
            ),
            BulkAction::Delete => {
                let location = self.location.clone();
                match self.lifecycle.delete(&targets, &location) {
                    Ok(trashed) => {
                        let ids: HashSet<&str> = trashed.iter().map(|e| e.id.as_str()).collect();
                        self.entries.retain(|e| !ids.contains(e.id.as_str()));
                        self.selection.clear();
                        self.notifier
                            .success(format!("Moved {} items to trash", trashed.len()));
                        Ok(ActionOutcome::Trashed(trashed.len()))
                    }
                    Err(err) => {
                        self.report_error("Moving to trash", &err);
                        Err(err)
                    }
                }
            }
            BulkAction::Restore => {
                let report = self.lifecycle.restore(&targets)?;
                self.reload_trash();
                if report.is_clean() {
                    self.notifier
                        .success(format!("Restored {} items", report.succeeded.len()));
                } else {
                    self.notifier
                        .warning(format!("Restore incomplete: {}", report.summary()));
                }
                Ok(ActionOutcome::Restored(report))
            }
            BulkAction::PermanentlyDelete => match self.lifecycle.permanently_delete(&targets) {
                Ok(count) => {
                    self.reload_trash();
                    self.notifier
                        .success(format!("Permanently deleted {} items", count));
                    Ok(ActionOutcome::Purged(count))
                }
                Err(err) => {
                    self.report_error("Permanent delete", &err);
                    Err(err)
                }
            },
            BulkAction::Download => {
                let result = selection::download(self.content.as_ref(), &targets).await;
                if result.report.is_clean() {
                    self.notifier
                        .success(format!("Downloaded {} files", result.downloaded.len()));
                } else {
                    self.notifier
                        .warning(format!("Download incomplete: {}", result.report.summary()));
                }
                Ok(ActionOutcome::Downloaded(result))
            }
        }
    }

    fn reload_trash(&mut self) {
        self.selection.clear();
        if self.location.is_trash() {
            self.entries = self.lifecycle.trash().unwrap_or_default();
        }
    }

    /// Keyboard shortcuts. Delete is inert without a selection and means
    /// permanent delete inside trash.
    pub async fn handle_key(&mut self, binding: KeyBinding) -> Result<Option<ActionOutcome>> {
        match binding {
            KeyBinding::SelectAll => {
                self.select_all();
                Ok(None)
            }
            KeyBinding::ClearSelection => {
                self.clear_selection();
                Ok(None)
            }
            KeyBinding::Delete if self.selection.is_empty() => Ok(None),
            KeyBinding::Delete => {
                let action = if self.location.is_trash() {
                    BulkAction::PermanentlyDelete
                } else {
                    BulkAction::Delete
                };
                let selected = self.selection.clone();
                self.perform(action, &selected).await.map(Some)
            }
        }
    }

    pub fn empty_trash(&mut self) -> Result<usize> {
        let count = self.lifecycle.empty_trash()?;
        self.reload_trash();
        self.notifier.success(format!("Emptied trash ({} items)", count));
        Ok(count)
    }

    pub fn trash(&self) -> Result<Vec<Entry>> {
        self.lifecycle.trash()
    }

    pub async fn refresh_connectivity(&self) -> Vec<(String, Connectivity)> {
        let results = self.catalog.check_all_connectivity().await;
        info!("Refreshed connectivity of {} projects", results.len());
        results
    }

    pub fn cache_usage(&self) -> CacheUsage {
        self.cache.usage()
    }

    pub fn register_project(&self, project: Project) {
        self.catalog.register_project(project);
    }

    pub fn projects(&self) -> Vec<Project> {
        self.catalog.projects()
    }
}
