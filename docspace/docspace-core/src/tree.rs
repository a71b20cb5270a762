//! Sidebar folder tree derived from flat cached location keys.
//!
//! Keys look like `office/Reports_42/Q1_43`. Every key at or below the base
//! prefix contributes a chain of nodes; chains sharing a prefix collapse into
//! one branch. Each segment's display name drops a single trailing `_token`
//! (see [`display_name`]), which is how identifiers are disambiguated in keys.

use std::collections::HashMap;

use crate::model::{unescape_key_segment, FolderTreeNode};

/// Display name of one key segment: everything before the last `_`.
///
/// `Quarterly_Report_9f2` shows as `Quarterly_Report`, `docs_` as `docs`. A
/// segment without `_`, or one that would become empty, is shown verbatim.
pub fn display_name(segment: &str) -> &str {
    match segment.rsplit_once('_') {
        Some((name, _token)) if !name.is_empty() => name,
        _ => segment,
    }
}

struct Pending {
    id: String,
    name: String,
    path: String,
    level: usize,
    children: Vec<usize>,
}

/// Build the forest of folders below `base` from the given location keys.
///
/// Keys outside `base` are ignored. The result is sorted case-insensitively
/// at every level.
pub fn build_folder_tree<I, S>(base: &str, keys: I) -> Vec<FolderTreeNode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let base = base.trim_end_matches('/');
    let mut nodes: Vec<Pending> = Vec::new();
    let mut by_path: HashMap<String, usize> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();

    for key in keys {
        let key = key.as_ref();
        let remainder = if base.is_empty() {
            key
        } else if key == base {
            continue;
        } else if let Some(rest) = key.strip_prefix(base).and_then(|r| r.strip_prefix('/')) {
            rest
        } else {
            continue;
        };

        let mut relative = String::new();
        let mut parent: Option<usize> = None;
        for (level, segment) in remainder.split('/').filter(|s| !s.is_empty()).enumerate() {
            if !relative.is_empty() {
                relative.push('/');
            }
            relative.push_str(segment);

            let idx = match by_path.get(&relative) {
                Some(&idx) => idx,
                None => {
                    let idx = nodes.len();
                    let path = if base.is_empty() {
                        relative.clone()
                    } else {
                        format!("{}/{}", base, relative)
                    };
                    nodes.push(Pending {
                        id: relative.clone(),
                        name: unescape_key_segment(display_name(segment)),
                        path,
                        level,
                        children: Vec::new(),
                    });
                    by_path.insert(relative.clone(), idx);
                    match parent {
                        Some(p) => nodes[p].children.push(idx),
                        None => roots.push(idx),
                    }
                    idx
                }
            };
            parent = Some(idx);
        }
    }

    assemble(&nodes, &roots)
}

fn assemble(nodes: &[Pending], indices: &[usize]) -> Vec<FolderTreeNode> {
    let mut out: Vec<FolderTreeNode> = indices
        .iter()
        .map(|&i| {
            let node = &nodes[i];
            FolderTreeNode {
                id: node.id.clone(),
                name: node.name.clone(),
                path: node.path.clone(),
                children: assemble(nodes, &node.children),
                level: node.level,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    out
}
