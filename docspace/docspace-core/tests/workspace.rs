use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use docspace_core::cache::{KeyValueStore, LocalCache, MemoryStore};
use docspace_core::catalog::{CatalogOp, InMemoryCatalog, RemoteCatalogClient, RemoteEntry, UploadFile};
use docspace_core::content::LocalBlobs;
use docspace_core::controller::{ActionOutcome, NavigationOutcome, WorkspaceController};
use docspace_core::error::WorkspaceError;
use docspace_core::model::{Category, Entry, EntryKind, Location, Project, TRASH_KEY};
use docspace_core::notify::{Notification, NotificationBus};
use docspace_core::selection::{BulkAction, KeyBinding, SelectionSet};
use docspace_core::session::StaticSession;
use std::sync::Arc;
use tokio::sync::broadcast;

struct Harness {
    controller: WorkspaceController,
    catalog: Arc<InMemoryCatalog>,
    session: Arc<StaticSession>,
    store: Arc<MemoryStore>,
    notes: broadcast::Receiver<Notification>,
}

impl Harness {
    fn new() -> Self {
        Self::with_quota(1 << 20, 50)
    }

    fn with_quota(quota: u64, min_trash: usize) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let session = Arc::new(StaticSession::new("tok"));
        let store = Arc::new(MemoryStore::new());
        let bus = NotificationBus::new();
        let notes = bus.subscribe();
        let blobs = Arc::new(LocalBlobs::new());
        let client = Arc::new(RemoteCatalogClient::new(catalog.clone(), session.clone()));
        let cache = Arc::new(LocalCache::new(store.clone(), quota, min_trash));
        let controller = WorkspaceController::new(client, cache, blobs.clone(), blobs, Arc::new(bus));
        Self {
            controller,
            catalog,
            session,
            store,
            notes,
        }
    }

    fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(note) = self.notes.try_recv() {
            out.push(note);
        }
        out
    }

    fn select(&self, ids: &[&str]) -> SelectionSet {
        let mut selection = SelectionSet::new(self.controller.location().key());
        selection.select_all(ids.iter().copied());
        selection
    }

    fn ids(&self) -> Vec<String> {
        self.controller
            .current_entries()
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }
}

#[tokio::test]
async fn create_enter_and_upload_with_partial_failure() {
    let mut h = Harness::new();
    h.controller.navigate(Location::office()).await;
    let folder = h.controller.create_folder("Reports").await.unwrap();
    assert_eq!(folder.kind, EntryKind::Folder);

    let inside = Location::office().enter(&folder).unwrap();
    assert_eq!(h.controller.navigate(inside.clone()).await, NavigationOutcome::Applied(0));

    h.catalog.reject_upload("b.bin", "too large");
    let files = vec![
        UploadFile::new("a.txt", "text/plain", "alpha"),
        UploadFile::new("b.bin", "application/octet-stream", "beta"),
        UploadFile::new("c.txt", "text/plain", "gamma"),
    ];
    let outcome = h.controller.upload(files).await.unwrap();
    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(outcome.failures[0].name, "b.bin");
    assert_eq!(h.catalog.calls(CatalogOp::Upload), 1);

    let names: Vec<String> = h
        .controller
        .current_entries()
        .iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names, vec!["a.txt", "c.txt"]);
    let notes = h.drain();
    assert!(notes
        .iter()
        .any(|n| matches!(n, Notification::Warning(m) if m.contains("b.bin: too large"))));

    let tree = h.controller.folder_tree("office");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].name, "Reports");
    assert_eq!(tree[0].path, inside.key());
}

#[tokio::test]
async fn uploaded_files_download_from_local_blobs() {
    let mut h = Harness::new();
    h.controller.navigate(Location::office()).await;
    h.controller
        .upload(vec![UploadFile::new("note.txt", "text/plain", "hello")])
        .await
        .unwrap();
    let id = h.ids()[0].clone();
    let selected = h.select(&[id.as_str()]);

    let outcome = h
        .controller
        .perform(BulkAction::Download, &selected)
        .await
        .unwrap();
    let ActionOutcome::Downloaded(result) = outcome else {
        panic!("expected download outcome");
    };
    assert_eq!(result.downloaded[0].1, Bytes::from_static(b"hello"));
    assert!(result.report.is_clean());
}

#[tokio::test]
async fn delete_restore_round_trip_through_trash() {
    let mut h = Harness::new();
    h.catalog.seed_root(
        Category::Shared,
        vec![
            RemoteEntry::file("a", "a.txt", 1),
            RemoteEntry::file("b", "b.txt", 2),
        ],
    );
    h.controller.navigate(Location::shared()).await;
    let before: Vec<Entry> = h.controller.current_entries().to_vec();

    h.controller.toggle("a");
    let selected = h.controller.selection().clone();
    let outcome = h.controller.perform(BulkAction::Delete, &selected).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Trashed(1)));
    assert_eq!(h.ids(), vec!["b"]);
    assert!(h.controller.selection().is_empty());

    // The catalog still lists the trashed entry; it stays hidden.
    h.controller.navigate(Location::shared()).await;
    assert_eq!(h.ids(), vec!["b"]);

    h.controller.navigate(Location::trash()).await;
    assert_eq!(h.ids(), vec!["a"]);
    let trashed = &h.controller.current_entries()[0];
    assert_eq!(trashed.original_path.as_deref(), Some("shared"));

    let selected = h.select(&["a"]);
    let outcome = h
        .controller
        .perform(BulkAction::Restore, &selected)
        .await
        .unwrap();
    let ActionOutcome::Restored(report) = outcome else {
        panic!("expected restore outcome");
    };
    assert!(report.is_clean());
    assert!(h.controller.current_entries().is_empty());

    h.controller.navigate(Location::shared()).await;
    let after: Vec<Entry> = h.controller.current_entries().to_vec();
    assert_eq!(after.len(), 2);
    for entry in &before {
        let restored = after.iter().find(|e| e.id == entry.id).unwrap();
        assert_eq!(restored.name, entry.name);
        assert_eq!(restored.path, entry.path);
        assert!(restored.deleted_at.is_none());
    }
}

#[tokio::test]
async fn delete_key_in_trash_purges_for_good() {
    let mut h = Harness::new();
    h.catalog.seed_root(Category::Office, vec![RemoteEntry::file("x", "x.txt", 1)]);
    h.controller.navigate(Location::office()).await;
    h.controller.handle_key(KeyBinding::SelectAll).await.unwrap();
    h.controller.handle_key(KeyBinding::Delete).await.unwrap();

    h.controller.navigate(Location::trash()).await;
    h.controller.handle_key(KeyBinding::SelectAll).await.unwrap();
    let outcome = h.controller.handle_key(KeyBinding::Delete).await.unwrap();
    assert!(matches!(outcome, Some(ActionOutcome::Purged(1))));
    assert!(h.controller.trash().unwrap().is_empty());

    let stale = h.select(&["x"]);
    let outcome = h.controller.perform(BulkAction::Restore, &stale).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Skipped));
}

#[tokio::test]
async fn actions_only_touch_currently_listed_entries() {
    let mut h = Harness::new();
    h.catalog.seed_root(
        Category::Gallery,
        vec![RemoteEntry::file("g1", "1.png", 1), RemoteEntry::file("g2", "2.png", 1)],
    );
    h.controller.navigate(Location::gallery()).await;
    h.controller.select_all();
    let remembered = h.controller.selection().clone();

    h.controller.navigate(Location::office()).await;
    assert!(h.controller.selection().is_empty());
    h.controller.navigate(Location::gallery()).await;
    assert!(h.controller.selection().is_empty());

    h.catalog.seed_root(Category::Gallery, vec![RemoteEntry::file("g2", "2.png", 1)]);
    h.controller.navigate(Location::gallery()).await;
    let outcome = h.controller.perform(BulkAction::Delete, &remembered).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Trashed(1)));
    let trash = h.controller.trash().unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, "g2");
}

#[tokio::test]
async fn restore_and_purge_are_rejected_outside_trash() {
    let mut h = Harness::new();
    h.catalog.seed_root(Category::Office, vec![RemoteEntry::file("a", "a", 1)]);
    h.controller.navigate(Location::office()).await;
    let selected = h.select(&["a"]);
    let err = h
        .controller
        .perform(BulkAction::Restore, &selected)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::InvalidLocation(_)));
}

#[tokio::test]
async fn unconfigured_project_fetches_once_and_warns() {
    let mut h = Harness::new();
    h.catalog.set_project("p9", None);
    h.controller.register_project(Project::new("p9", "Unprovisioned"));

    let outcome = h.controller.navigate(Location::project("p9")).await;
    assert_eq!(
        outcome,
        NavigationOutcome::Failed(WorkspaceError::NotConfigured {
            project: "p9".to_string()
        })
    );
    assert_eq!(h.catalog.calls(CatalogOp::GetProject), 1);
    assert_eq!(h.catalog.calls(CatalogOp::List), 0);
    assert!(h.controller.current_entries().is_empty());
    assert!(matches!(h.drain().as_slice(), [Notification::Warning(_)]));
}

#[tokio::test]
async fn missing_storage_root_is_a_warning() {
    let mut h = Harness::new();
    h.controller
        .register_project(Project::new("p1", "Bridge").with_root("blob/absent"));
    let outcome = h.controller.navigate(Location::project("p1")).await;
    assert!(matches!(outcome, NavigationOutcome::Failed(WorkspaceError::NotFound(_))));
    assert!(matches!(h.drain().as_slice(), [Notification::Warning(m)] if m.contains("Storage root not found")));
}

#[tokio::test]
async fn signed_out_session_clears_silently() {
    let mut h = Harness::new();
    h.catalog.seed_root(Category::Office, vec![RemoteEntry::file("a", "a", 1)]);
    h.controller.navigate(Location::office()).await;
    assert_eq!(h.ids(), vec!["a"]);

    h.session.sign_out();
    let outcome = h.controller.navigate(Location::office()).await;
    assert_eq!(outcome, NavigationOutcome::Failed(WorkspaceError::Unauthenticated));
    assert!(h.controller.current_entries().is_empty());
    assert!(h.drain().is_empty());
    assert_eq!(h.catalog.calls(CatalogOp::List), 1);
}

#[tokio::test]
async fn full_cache_still_shows_live_results() {
    let mut h = Harness::with_quota(100, 50);
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let trash: Vec<Entry> = (0..10)
        .map(|i| Entry {
            id: format!("t{}", i),
            name: format!("old-{}.txt", i),
            kind: EntryKind::File,
            size: 1,
            last_modified: base,
            owner: String::new(),
            path: TRASH_KEY.to_string(),
            original_path: Some("office".to_string()),
            deleted_at: Some(base + Duration::minutes(i)),
            content: None,
        })
        .collect();
    h.store
        .set("entries:trash", &serde_json::to_string(&trash).unwrap())
        .unwrap();
    h.catalog.seed_root(Category::Office, vec![RemoteEntry::file("live", "live.txt", 80)]);

    let outcome = h.controller.navigate(Location::office()).await;
    assert_eq!(outcome, NavigationOutcome::Applied(1));
    assert_eq!(h.ids(), vec!["live"]);
    assert!(h.store.get("entries:office").unwrap().is_none());
    assert_eq!(h.controller.trash().unwrap(), trash);
    assert!(matches!(h.drain().as_slice(), [Notification::Warning(m)] if m.contains("Local storage is full")));
}

#[tokio::test]
async fn trashed_folder_leaves_the_sidebar_until_restored() {
    let mut h = Harness::new();
    h.controller.navigate(Location::office()).await;
    let folder = h.controller.create_folder("Specs").await.unwrap();
    let inside = Location::office().enter(&folder).unwrap();
    h.controller.navigate(inside.clone()).await;
    let nested = h.controller.create_folder("Drafts").await.unwrap();
    h.controller
        .navigate(inside.enter(&nested).unwrap())
        .await;
    assert_eq!(h.controller.folder_tree("office")[0].children.len(), 1);

    h.controller.navigate(Location::office()).await;
    let selected = h.select(&[folder.id.as_str()]);
    let outcome = h
        .controller
        .perform(BulkAction::Delete, &selected)
        .await
        .unwrap();
    assert!(matches!(outcome, ActionOutcome::Trashed(1)));
    assert!(h.controller.folder_tree("office").is_empty());

    h.controller.navigate(Location::trash()).await;
    let selected = h.select(&[folder.id.as_str()]);
    h.controller
        .perform(BulkAction::Restore, &selected)
        .await
        .unwrap();
    let tree = h.controller.folder_tree("office");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].children[0].name, "Drafts");
}

#[tokio::test]
async fn connectivity_refresh_updates_projects() {
    let h = Harness::new();
    h.catalog.add_root("blob/p1");
    h.controller
        .register_project(Project::new("p1", "Bridge").with_root("blob/p1"));
    h.controller
        .register_project(Project::new("p2", "Tunnel").with_root("blob/p2"));

    let results = h.controller.refresh_connectivity().await;
    assert_eq!(results.len(), 2);
    let projects = h.controller.projects();
    assert_eq!(projects[0].connectivity.item_count, Some(0));
    assert_eq!(projects[1].connectivity.last_error.as_deref(), Some("root not found"));
    assert!(h.controller.cache_usage().summary().contains("of 1.00 MB"));
}

#[tokio::test]
async fn delete_that_trash_cannot_hold_keeps_entries_listed() {
    let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let remote: Vec<RemoteEntry> = ["a", "b", "c"]
        .into_iter()
        .map(|id| RemoteEntry {
            last_modified: Some(stamp),
            ..RemoteEntry::file(id, format!("{}.txt", id), 5)
        })
        .collect();
    let cached: Vec<Entry> = remote.iter().cloned().map(|r| r.into_entry("office")).collect();
    let office_bytes = ("entries:office".len() + serde_json::to_string(&cached).unwrap().len()) as u64;

    let mut h = Harness::with_quota(office_bytes + 20, 1);
    h.catalog.seed_root(Category::Office, remote);
    assert_eq!(h.controller.navigate(Location::office()).await, NavigationOutcome::Applied(3));
    assert!(h.drain().is_empty());

    let selected = h.select(&["a", "b", "c"]);
    let err = h.controller.perform(BulkAction::Delete, &selected).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::QuotaExceeded { .. }));
    assert_eq!(h.ids(), vec!["a", "b", "c"]);
    assert!(h.controller.trash().unwrap().is_empty());
    assert!(matches!(h.drain().as_slice(), [Notification::Error(m)] if m.starts_with("Moving to trash failed")));
}
