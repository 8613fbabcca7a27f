//! Remote tree walker
//!
//! Enumerates every configured source root depth-first and groups what it
//! finds into [`ChartGroup`]s: one per archive file, and one per folder whose
//! direct files look like a chart (a notation file plus an audio file).
//!
//! The walk is iterative over an explicit stack. One visited set spans the
//! whole run, so aliases that point back at an ancestor, or at a folder
//! another source already covered, are never walked twice.

use crate::model::{ChartGroup, NodeKind, RemoteFile, RemoteNode, Snapshot, SourceRoot};
use crate::naming::{is_archive_extension, is_audio_extension, is_notation_extension};
use crate::remote::RemoteStore;
use chartscan_common::events::{EventBus, IngestEvent};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Something the walk skipped that an operator may want to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkWarning {
    OversizedArchive {
        root_id: String,
        node_id: String,
        name: String,
        size_bytes: u64,
        limit_bytes: u64,
    },
    UnsupportedNode {
        root_id: String,
        node_id: String,
        name: String,
        parent_id: String,
    },
    /// Listing kept failing; the folder was treated as empty
    ListingFailed {
        root_id: String,
        folder_id: String,
        reason: String,
    },
    /// Alias target or single-file root could not be fetched
    NodeUnavailable {
        root_id: String,
        node_id: String,
        reason: String,
    },
}

/// Result of walking all in-scope sources
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub snapshot: Snapshot,
    pub warnings: Vec<WalkWarning>,
}

/// Splits configured sources into those walked this run and the ids of
/// those skipped by a partial scan (the last `only_scan_last` are walked).
pub fn partition_sources(
    sources: &[SourceRoot],
    only_scan_last: Option<usize>,
) -> (Vec<SourceRoot>, HashSet<String>) {
    let first_scanned = match only_scan_last {
        Some(n) if n > 0 => sources.len().saturating_sub(n),
        _ => 0,
    };
    let excluded = sources[..first_scanned]
        .iter()
        .map(|s| s.root_id.clone())
        .collect();
    (sources[first_scanned..].to_vec(), excluded)
}

/// Content identity of a chart folder: SHA-256 over its members' sorted
/// content hashes joined with `,`. Members without a hash count as empty.
pub fn group_hash<'a, I>(content_hashes: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut hashes: Vec<&str> = content_hashes
        .into_iter()
        .map(|h| h.unwrap_or(""))
        .collect();
    hashes.sort_unstable();
    format!("{:x}", Sha256::digest(hashes.join(",").as_bytes()))
}

fn looks_like_chart_folder(files: &[RemoteNode]) -> bool {
    let has_ext = |pred: fn(&str) -> bool| {
        files
            .iter()
            .filter_map(|f| f.extension.as_deref())
            .any(pred)
    };
    has_ext(is_notation_extension) && has_ext(is_audio_extension)
}

struct PendingFolder {
    id: String,
    name: String,
}

/// Walks source roots on a [`RemoteStore`]
pub struct TreeWalker<'a> {
    store: &'a dyn RemoteStore,
    /// Every configured root, scanned this run or not
    source_ids: HashSet<String>,
    max_archive_size_bytes: u64,
    events: Option<&'a EventBus>,
}

/// Per-source walk state
struct SourceWalk<'s> {
    source: &'s SourceRoot,
    stack: Vec<PendingFolder>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        all_sources: &[SourceRoot],
        max_archive_size_bytes: u64,
    ) -> Self {
        Self {
            store,
            source_ids: all_sources.iter().map(|s| s.root_id.clone()).collect(),
            max_archive_size_bytes,
            events: None,
        }
    }

    pub fn with_events(mut self, events: &'a EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Walk `sources`. Ids in `excluded` are treated as already visited, so
    /// they are skipped even where they appear nested in a walked source.
    pub async fn walk(&self, sources: &[SourceRoot], excluded: &HashSet<String>) -> WalkOutcome {
        let mut visited: HashSet<String> = excluded.clone();
        let mut outcome = WalkOutcome::default();

        for source in sources {
            tracing::info!(
                source = %source.display_name,
                root_id = %source.root_id,
                "Scanning source"
            );
            if let Some(events) = self.events {
                events.emit_lossy(IngestEvent::SourceWalkStarted {
                    root_id: source.root_id.clone(),
                    source_name: source.display_name.clone(),
                    timestamp: Utc::now(),
                });
            }

            let before = outcome.snapshot.len();
            outcome.snapshot.touch_root(&source.root_id);
            self.walk_source(source, &mut visited, &mut outcome).await;
            let group_count = outcome.snapshot.len() - before;

            tracing::info!(
                source = %source.display_name,
                groups = group_count,
                "Finished scanning source"
            );
            if let Some(events) = self.events {
                events.emit_lossy(IngestEvent::SourceWalkCompleted {
                    root_id: source.root_id.clone(),
                    group_count,
                    timestamp: Utc::now(),
                });
            }
        }

        outcome
    }

    async fn walk_source(
        &self,
        source: &SourceRoot,
        visited: &mut HashSet<String>,
        outcome: &mut WalkOutcome,
    ) {
        let mut walk = SourceWalk {
            source,
            stack: Vec::new(),
        };

        if source.is_single_file_source {
            match self.store.get_node(&source.root_id).await {
                Ok(node) => {
                    let parent = PendingFolder {
                        id: source.root_id.clone(),
                        name: source.display_name.clone(),
                    };
                    self.visit_item(&mut walk, &parent, node, true, visited, outcome)
                        .await;
                }
                Err(e) => {
                    tracing::error!(
                        root_id = %source.root_id,
                        error = %e,
                        "Failed to read single-file source"
                    );
                    outcome.warnings.push(WalkWarning::NodeUnavailable {
                        root_id: source.root_id.clone(),
                        node_id: source.root_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            visited.insert(source.root_id.clone());
            walk.stack.push(PendingFolder {
                id: source.root_id.clone(),
                name: source.display_name.clone(),
            });
        }

        while let Some(folder) = walk.stack.pop() {
            self.walk_folder(&mut walk, folder, visited, outcome).await;
        }
    }

    /// List one folder, queue its subfolders and emit a group if its files
    /// look like a chart
    async fn walk_folder(
        &self,
        walk: &mut SourceWalk<'_>,
        folder: PendingFolder,
        visited: &mut HashSet<String>,
        outcome: &mut WalkOutcome,
    ) {
        let children = match self.store.list_children(&folder.id).await {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(
                    folder_id = %folder.id,
                    folder = %folder.name,
                    error = %e,
                    "Listing failed after retries; treating folder as empty"
                );
                outcome.warnings.push(WalkWarning::ListingFailed {
                    root_id: walk.source.root_id.clone(),
                    folder_id: folder.id.clone(),
                    reason: e.to_string(),
                });
                Vec::new()
            }
        };

        if children.is_empty() {
            tracing::info!(
                folder = %folder.name,
                url = %format!("https://drive.google.com/drive/folders/{}", folder.id),
                "Empty folder"
            );
            return;
        }

        let mut chart_files = Vec::new();
        for child in children {
            if let Some(file) = self
                .visit_item(walk, &folder, child, false, visited, outcome)
                .await
            {
                chart_files.push(file);
            }
        }

        if looks_like_chart_folder(&chart_files) {
            let group_id = group_hash(chart_files.iter().map(|f| f.content_hash.as_deref()));
            tracing::info!(
                source = %walk.source.display_name,
                folder = %folder.name,
                files = chart_files.len(),
                group_id = %group_id,
                "Chart folder"
            );
            outcome.snapshot.insert(ChartGroup {
                group_id,
                source: walk.source.clone(),
                folder_name: folder.name,
                folder_id: folder.id,
                is_archive: false,
                members: chart_files.iter().map(RemoteFile::from).collect(),
                local_path: None,
            });
        }
    }

    /// Handle one child of `parent`. Returns the node when it is a plain
    /// extensioned file that may belong to a chart folder.
    async fn visit_item(
        &self,
        walk: &mut SourceWalk<'_>,
        parent: &PendingFolder,
        mut item: RemoteNode,
        is_source: bool,
        visited: &mut HashSet<String>,
        outcome: &mut WalkOutcome,
    ) -> Option<RemoteNode> {
        let root_id = &walk.source.root_id;

        if item.kind == NodeKind::Alias {
            let target = item.alias_target.clone()?;
            if visited.contains(&target.id) {
                tracing::debug!(alias = %item.name, target_id = %target.id, "Alias target already visited");
                return None;
            }
            if self.is_nested_source(&target.id, root_id) {
                visited.insert(target.id);
                return None;
            }
            if target.is_folder {
                // Walked under the alias's own name
                visited.insert(target.id.clone());
                walk.stack.push(PendingFolder {
                    id: target.id,
                    name: item.name,
                });
                return None;
            }
            match self.store.get_node(&target.id).await {
                Ok(resolved) if resolved.kind != NodeKind::Alias => item = resolved,
                Ok(_) => return None,
                Err(e) => {
                    tracing::warn!(alias = %item.name, target_id = %target.id, error = %e, "Failed to resolve alias");
                    outcome.warnings.push(WalkWarning::NodeUnavailable {
                        root_id: root_id.clone(),
                        node_id: target.id,
                        reason: e.to_string(),
                    });
                    return None;
                }
            }
        }

        if item.is_folder() && visited.contains(&item.id) {
            return None;
        }
        visited.insert(item.id.clone());
        if !is_source && self.is_nested_source(&item.id, root_id) {
            tracing::debug!(node_id = %item.id, "Skipping nested source");
            return None;
        }

        match item.kind {
            NodeKind::Folder => {
                walk.stack.push(PendingFolder {
                    id: item.id,
                    name: item.name,
                });
                None
            }
            NodeKind::Unsupported => {
                tracing::warn!(
                    name = %item.name,
                    parent_id = %parent.id,
                    source = %walk.source.display_name,
                    "Unsupported remote document type"
                );
                outcome.warnings.push(WalkWarning::UnsupportedNode {
                    root_id: root_id.clone(),
                    node_id: item.id,
                    name: item.name,
                    parent_id: parent.id.clone(),
                });
                None
            }
            NodeKind::Alias => None,
            NodeKind::File => {
                let ext = item.extension.clone()?;
                if is_archive_extension(&ext) {
                    self.emit_archive(walk.source, parent, item, outcome);
                    None
                } else {
                    Some(item)
                }
            }
        }
    }

    fn emit_archive(
        &self,
        source: &SourceRoot,
        parent: &PendingFolder,
        item: RemoteNode,
        outcome: &mut WalkOutcome,
    ) {
        if item.size_bytes > self.max_archive_size_bytes {
            tracing::warn!(
                name = %item.name,
                source = %source.display_name,
                size_bytes = item.size_bytes,
                limit_bytes = self.max_archive_size_bytes,
                "Archive is too large to download"
            );
            outcome.warnings.push(WalkWarning::OversizedArchive {
                root_id: source.root_id.clone(),
                node_id: item.id,
                name: item.name,
                size_bytes: item.size_bytes,
                limit_bytes: self.max_archive_size_bytes,
            });
            return;
        }

        tracing::info!(source = %source.display_name, name = %item.name, "Archive");
        let group_id = item.content_hash.clone().unwrap_or_else(|| item.id.clone());
        outcome.snapshot.insert(ChartGroup {
            group_id,
            source: source.clone(),
            folder_name: parent.name.clone(),
            folder_id: parent.id.clone(),
            is_archive: true,
            members: vec![RemoteFile::from(&item)],
            local_path: None,
        });
    }

    fn is_nested_source(&self, node_id: &str, current_root: &str) -> bool {
        node_id != current_root && self.source_ids.contains(node_id)
    }
}
