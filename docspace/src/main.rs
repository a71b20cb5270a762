//! Command-line shell over the document workspace.

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use docspace_core::{
    cache::{FileStore, LocalCache},
    catalog::{HttpCatalog, RemoteCatalogClient, UploadFile},
    config::WorkspaceConfig,
    content::{HttpContentResolver, LocalBlobs},
    controller::{ActionOutcome, NavigationOutcome, WorkspaceController},
    error::WorkspaceError,
    model::{Addressing, Category, Entry, FolderTreeNode, Location, PathSegment, Project},
    notify::{Notification, NotificationBus},
    selection::{BulkAction, SelectionSet},
    session::{EnvSession, SessionProvider},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docspace")]
#[command(about = "Browse and manage workspace documents from the terminal")]
struct Cli {
    /// JSON config file; DOCSPACE_* variables are used when absent
    #[arg(short, long, env = "DOCSPACE_CONFIG")]
    config: Option<PathBuf>,

    /// Register a project as `<id>` or `<id>=<storage root>`
    #[arg(short, long = "project")]
    projects: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a location, e.g. `office/Reports:42` or `project/p1/docs`
    Ls { location: String },

    /// Show the cached folder tree below a key prefix
    Tree {
        #[arg(default_value = "office")]
        base: String,
    },

    /// Create a folder
    Mkdir { location: String, name: String },

    /// Upload files in one batch
    Upload {
        location: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Move entries to trash
    Rm {
        location: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List trash
    Trash,

    /// Restore entries from trash
    Restore {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete trashed entries for good
    Purge {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete everything in trash
    EmptyTrash,

    /// Download entries into a directory
    Get {
        location: String,
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Check project storage connectivity
    Projects { ids: Vec<String> },

    /// Show local cache usage
    Usage,
}

fn parse_location(raw: &str) -> Result<Location> {
    let mut parts = raw.split('/').filter(|p| !p.is_empty());
    let head = parts.next().ok_or_else(|| anyhow!("empty location"))?;
    let category = Category::from_str(head).ok_or_else(|| anyhow!("unknown category {}", head))?;
    let mut location = match category {
        Category::Project => {
            let id = parts
                .next()
                .ok_or_else(|| anyhow!("project locations look like project/<id>/..."))?;
            Location::project(id)
        }
        other => Location::root(other)?,
    };
    for part in parts {
        let segment = match category.addressing() {
            Addressing::ByPath => PathSegment::path(part),
            _ => match part.split_once(':') {
                Some((name, id)) => PathSegment::id(name, id),
                None => PathSegment::id(part, part),
            },
        };
        location = location.descend(segment)?;
    }
    Ok(location)
}

fn parse_project(raw: &str) -> Project {
    match raw.split_once('=') {
        Some((id, root)) => Project::new(id, id).with_root(root),
        None => Project::new(raw, raw),
    }
}

fn guess_mime(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

fn print_entries(entries: &[Entry]) {
    if entries.is_empty() {
        println!("(empty)");
        return;
    }
    for entry in entries {
        let kind = if entry.is_folder() { "dir " } else { "file" };
        let when = entry
            .deleted_at
            .unwrap_or(entry.last_modified)
            .format("%Y-%m-%d %H:%M");
        println!("{} {:>10} {} {}  [{}]", kind, entry.size, when, entry.name, entry.id);
    }
}

fn print_tree(nodes: &[FolderTreeNode]) {
    for node in nodes {
        println!("{}{}  ({})", "  ".repeat(node.level), node.name, node.path);
        print_tree(&node.children);
    }
}

fn drain(rx: &mut broadcast::Receiver<Notification>) {
    while let Ok(note) = rx.try_recv() {
        match note {
            Notification::Info(m) => println!("[info] {}", m),
            Notification::Success(m) => println!("[ok] {}", m),
            Notification::Warning(m) => eprintln!("[warning] {}", m),
            Notification::Error(m) => eprintln!("[error] {}", m),
        }
    }
}

async fn open_location(controller: &mut WorkspaceController, raw: &str) -> Result<()> {
    let location = parse_location(raw)?;
    if let Some(project_id) = location.project_id() {
        if controller.catalog().project(project_id).is_none() {
            controller.register_project(Project::new(project_id, project_id));
        }
    }
    match controller.navigate(location).await {
        NavigationOutcome::Applied(n) => {
            debug!("Listed {} entries", n);
            Ok(())
        }
        NavigationOutcome::Failed(WorkspaceError::Unauthenticated) => {
            bail!("not signed in; set DOCSPACE_TOKEN")
        }
        NavigationOutcome::Failed(err) => Err(err.into()),
        NavigationOutcome::Stale => Ok(()),
    }
}

fn selection_of(controller: &WorkspaceController, ids: &[String]) -> SelectionSet {
    let mut selection = SelectionSet::new(controller.location().key());
    selection.select_all(ids.iter().map(String::as_str));
    selection
}

async fn run(cli: Cli, controller: &mut WorkspaceController) -> Result<()> {
    match cli.command {
        Commands::Ls { location } => {
            open_location(controller, &location).await?;
            print_entries(controller.current_entries());
        }
        Commands::Tree { base } => {
            print_tree(&controller.folder_tree(&base));
        }
        Commands::Mkdir { location, name } => {
            open_location(controller, &location).await?;
            let folder = controller.create_folder(&name).await?;
            println!("{}", folder.id);
        }
        Commands::Upload { location, files } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("bad file name {}", path.display()))?;
                uploads.push(UploadFile::new(name, guess_mime(path), Bytes::from(data)));
            }
            open_location(controller, &location).await?;
            let outcome = controller.upload(uploads).await?;
            print_entries(&outcome.entries());
        }
        Commands::Rm { location, ids } => {
            open_location(controller, &location).await?;
            let selection = selection_of(controller, &ids);
            controller.perform(BulkAction::Delete, &selection).await?;
        }
        Commands::Trash => {
            open_location(controller, "trash").await?;
            print_entries(controller.current_entries());
        }
        Commands::Restore { ids } => {
            open_location(controller, "trash").await?;
            let selection = selection_of(controller, &ids);
            controller.perform(BulkAction::Restore, &selection).await?;
        }
        Commands::Purge { ids } => {
            open_location(controller, "trash").await?;
            let selection = selection_of(controller, &ids);
            controller.perform(BulkAction::PermanentlyDelete, &selection).await?;
        }
        Commands::EmptyTrash => {
            controller.empty_trash()?;
        }
        Commands::Get { location, ids, out } => {
            open_location(controller, &location).await?;
            let selection = selection_of(controller, &ids);
            if let ActionOutcome::Downloaded(result) = controller.perform(BulkAction::Download, &selection).await? {
                tokio::fs::create_dir_all(&out).await?;
                for (entry, bytes) in result.downloaded {
                    let target = out.join(&entry.name);
                    tokio::fs::write(&target, &bytes)
                        .await
                        .with_context(|| format!("writing {}", target.display()))?;
                    println!("{} -> {}", entry.name, target.display());
                }
            }
        }
        Commands::Projects { ids } => {
            for id in &ids {
                if controller.catalog().project(id).is_none() {
                    controller.register_project(Project::new(id.as_str(), id.as_str()));
                }
            }
            for (id, connectivity) in controller.refresh_connectivity().await {
                println!(
                    "{:<20} {:?} items={} {}",
                    id,
                    connectivity.connected,
                    connectivity
                        .item_count
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                    connectivity.last_error.unwrap_or_default()
                );
            }
        }
        Commands::Usage => {
            println!("{}", controller.cache_usage().summary());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => WorkspaceConfig::from_json_file(path)?,
        None => WorkspaceConfig::from_env()?,
    };
    let cache_dir = config
        .cache_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".docspace"));
    info!("Using catalog {} and cache {}", config.api_url, cache_dir.display());

    let session: Arc<dyn SessionProvider> = Arc::new(EnvSession::new("DOCSPACE_TOKEN"));
    let service = Arc::new(HttpCatalog::new(&config.api_url, config.request_timeout())?);
    let catalog = Arc::new(RemoteCatalogClient::new(service, session.clone()));
    for raw in &cli.projects {
        catalog.register_project(parse_project(raw));
    }

    let store = Arc::new(FileStore::open(&cache_dir)?);
    let cache = Arc::new(LocalCache::new(
        store,
        config.cache_quota_bytes,
        config.min_trash_retained,
    ));
    let blobs = Arc::new(LocalBlobs::new());
    let resolver = Arc::new(HttpContentResolver::new(
        session,
        blobs.clone(),
        config.request_timeout(),
    )?);
    let bus = NotificationBus::new();
    let mut notes = bus.subscribe();

    let mut controller = WorkspaceController::new(catalog, cache, resolver, blobs, Arc::new(bus));
    let result = run(cli, &mut controller).await;
    drain(&mut notes);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_addressing_schemes() {
        let office = parse_location("office/Reports:42/Q1:43").unwrap();
        assert_eq!(office.key(), "office/Reports_42/Q1_43");

        let bare = parse_location("shared/abc").unwrap();
        assert_eq!(bare.key(), "shared/abc_abc");

        let project = parse_location("project/p1/raw_data/2024").unwrap();
        assert_eq!(project.key(), "project/p1/raw_data_/2024_");
        assert!(parse_location("trash").unwrap().is_trash());
    }

    #[test]
    fn rejects_bad_locations() {
        assert!(parse_location("").is_err());
        assert!(parse_location("attic").is_err());
        assert!(parse_location("project").is_err());
        assert!(parse_location("trash/x").is_err());
    }

    #[test]
    fn project_flags() {
        let project = parse_project("p1=blob/p1");
        assert_eq!(project.remote_folder_path.as_deref(), Some("blob/p1"));
        assert!(parse_project("p2").remote_folder_path.is_none());
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(guess_mime(std::path::Path::new("a.PDF")), "application/pdf");
        assert_eq!(guess_mime(std::path::Path::new("blob")), "application/octet-stream");
    }
}
