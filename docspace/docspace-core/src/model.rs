//! Entries, locations and projects as seen by the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WorkspaceError};

/// Cache key of the trash pseudo-location.
pub const TRASH_KEY: &str = "trash";

/// Top-level document scopes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Office,
    Project,
    Shared,
    Gallery,
    Trash,
}

/// How folders inside a category are addressed by the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    /// Database-issued folder identifiers.
    ById,
    /// Literal storage paths below a provisioned root.
    ByPath,
    /// Kept only in the local cache.
    Local,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Office => "office",
            Category::Project => "project",
            Category::Shared => "shared",
            Category::Gallery => "gallery",
            Category::Trash => "trash",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "office" => Some(Category::Office),
            "project" => Some(Category::Project),
            "shared" => Some(Category::Shared),
            "gallery" => Some(Category::Gallery),
            "trash" => Some(Category::Trash),
            _ => None,
        }
    }

    pub fn addressing(&self) -> Addressing {
        match self {
            Category::Project => Addressing::ByPath,
            Category::Trash => Addressing::Local,
            Category::Office | Category::Shared | Category::Gallery => Addressing::ById,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a folder, fixed at creation time and never re-inferred.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FolderRef {
    Id(String),
    Path(String),
}

/// One step below a category root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    pub folder: FolderRef,
}

impl PathSegment {
    pub fn id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: FolderRef::Id(id.into()),
        }
    }

    pub fn path(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        Self {
            name: fragment.clone(),
            folder: FolderRef::Path(fragment),
        }
    }

    /// Encoding used inside location keys: `<name>_<id>` for identifiers and
    /// `<fragment>_` for path fragments, so the folder tree display rule
    /// (drop the last `_` token) recovers the visible name in both cases.
    fn key_fragment(&self) -> String {
        match &self.folder {
            FolderRef::Id(id) => format!("{}_{}", escape(&self.name, false), escape(id, true)),
            FolderRef::Path(fragment) => format!("{}_", escape(fragment, false)),
        }
    }
}

/// Percent-escape `%` and `/`, plus `_` when `underscore` is set. Reversed
/// by [`unescape_key_segment`].
fn escape(raw: &str, underscore: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '_' if underscore => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    out
}

/// Undo the escaping applied to names and ids inside location keys.
pub fn unescape_key_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        let decoded = match rest.get(i + 1..i + 3) {
            Some("25") => Some('%'),
            Some("2F") => Some('/'),
            Some("5F") => Some('_'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[i + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[i + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// A navigable folder scope: category, optional project and folder chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    category: Category,
    project: Option<String>,
    segments: Vec<PathSegment>,
}

impl Location {
    /// Root of a category that needs no project.
    pub fn root(category: Category) -> Result<Self> {
        if category == Category::Project {
            return Err(WorkspaceError::InvalidLocation(
                "project locations need a project id".to_string(),
            ));
        }
        Ok(Self {
            category,
            project: None,
            segments: Vec::new(),
        })
    }

    pub fn office() -> Self {
        Self::fixed(Category::Office)
    }

    pub fn shared() -> Self {
        Self::fixed(Category::Shared)
    }

    pub fn gallery() -> Self {
        Self::fixed(Category::Gallery)
    }

    pub fn trash() -> Self {
        Self::fixed(Category::Trash)
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self {
            category: Category::Project,
            project: Some(id.into()),
            segments: Vec::new(),
        }
    }

    fn fixed(category: Category) -> Self {
        Self {
            category,
            project: None,
            segments: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_trash(&self) -> bool {
        self.category == Category::Trash
    }

    /// Append a segment, rejecting one whose addressing contradicts the category.
    pub fn descend(&self, segment: PathSegment) -> Result<Self> {
        let allowed = match (self.category.addressing(), &segment.folder) {
            (Addressing::ById, FolderRef::Id(_)) => true,
            (Addressing::ByPath, FolderRef::Path(_)) => true,
            _ => false,
        };
        if !allowed {
            return Err(WorkspaceError::InvalidLocation(format!(
                "{:?} segment not allowed in {}",
                segment.folder, self.category
            )));
        }
        let mut next = self.clone();
        next.segments.push(segment);
        Ok(next)
    }

    /// Location of a folder entry listed here.
    pub fn enter(&self, entry: &Entry) -> Result<Self> {
        if entry.kind != EntryKind::Folder {
            return Err(WorkspaceError::InvalidLocation(format!(
                "{} is not a folder",
                entry.name
            )));
        }
        let segment = match self.category.addressing() {
            Addressing::ById => PathSegment::id(&entry.name, &entry.id),
            Addressing::ByPath => PathSegment::path(&entry.name),
            Addressing::Local => {
                return Err(WorkspaceError::InvalidLocation(
                    "trashed folders cannot be opened".to_string(),
                ))
            }
        };
        self.descend(segment)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Canonical cache key, e.g. `office/Reports_42` or `project/p1/docs_`.
    pub fn key(&self) -> String {
        let mut key = self.category.as_str().to_string();
        if let Some(project) = &self.project {
            key.push('/');
            key.push_str(&escape(project, true));
        }
        for segment in &self.segments {
            key.push('/');
            key.push_str(&segment.key_fragment());
        }
        key
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category)?;
        if let Some(project) = &self.project {
            write!(f, " / {}", project)?;
        }
        for segment in &self.segments {
            write!(f, " / {}", segment.name)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Where an entry's bytes come from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ContentRef {
    /// Transient handle into [`crate::content::LocalBlobs`].
    Local { handle: String },
    Remote { url: String, mime_type: String },
}

/// A file or folder record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub owner: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
}

impl Entry {
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Reachability of a project's storage root.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Connectivity {
    pub connected: ConnectionState,
    #[serde(default)]
    pub item_count: Option<usize>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Connectivity {
    pub fn connected(item_count: Option<usize>) -> Self {
        Self {
            connected: ConnectionState::Connected,
            item_count,
            last_error: None,
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self {
            connected: ConnectionState::Disconnected,
            item_count: None,
            last_error: Some(reason.into()),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            connected: ConnectionState::Unknown,
            item_count: None,
            last_error: Some(reason.into()),
        }
    }
}

/// External project descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub remote_folder_path: Option<String>,
    #[serde(default)]
    pub connectivity: Connectivity,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            remote_folder_path: None,
            connectivity: Connectivity::default(),
        }
    }

    pub fn with_root(mut self, path: impl Into<String>) -> Self {
        self.remote_folder_path = Some(path.into());
        self
    }
}

/// Derived sidebar node; never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FolderTreeNode {
    pub id: String,
    pub name: String,
    pub path: String,
    pub children: Vec<FolderTreeNode>,
    pub level: usize,
}
