//! Core data model: remote nodes, sources, chart groups and snapshots

use chartscan_common::config::SourceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of an item in the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
    /// Shortcut to exactly one other node
    Alias,
    /// Store-native documents with no downloadable content
    Unsupported,
}

/// Where an alias points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTarget {
    pub id: String,
    pub is_folder: bool,
}

/// One item in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    /// Lowercase extension without the dot
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub modified_time: Option<DateTime<Utc>>,
    pub alias_target: Option<AliasTarget>,
}

impl RemoteNode {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Folder,
            name: name.into(),
            extension: None,
            size_bytes: 0,
            content_hash: None,
            modified_time: None,
            alias_target: None,
        }
    }

    pub fn file(
        id: impl Into<String>,
        name: impl Into<String>,
        size_bytes: u64,
        content_hash: Option<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            kind: NodeKind::File,
            extension: extension_of(&name),
            name,
            size_bytes,
            content_hash,
            modified_time: None,
            alias_target: None,
        }
    }

    pub fn alias(id: impl Into<String>, name: impl Into<String>, target: AliasTarget) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Alias,
            name: name.into(),
            extension: None,
            size_bytes: 0,
            content_hash: None,
            modified_time: None,
            alias_target: Some(target),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Lowercase extension of `name`, if it has a non-empty one
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// A configured entry point into the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRoot {
    pub root_id: String,
    pub display_name: String,
    pub is_single_file_source: bool,
    pub required_icon: Option<String>,
}

impl From<&SourceConfig> for SourceRoot {
    fn from(config: &SourceConfig) -> Self {
        Self {
            root_id: config.root_id.clone(),
            display_name: config.name.clone(),
            is_single_file_source: config.single_file,
            required_icon: config.icon.clone(),
        }
    }
}

/// Persisted projection of a member file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub modified_time: Option<DateTime<Utc>>,
}

impl From<&RemoteNode> for RemoteFile {
    fn from(node: &RemoteNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            size_bytes: node.size_bytes,
            content_hash: node.content_hash.clone(),
            modified_time: node.modified_time,
        }
    }
}

/// The unit of content identity: one archive file, or one folder that looks like a chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroup {
    pub group_id: String,
    pub source: SourceRoot,
    pub folder_name: String,
    pub folder_id: String,
    pub is_archive: bool,
    pub members: Vec<RemoteFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl ChartGroup {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(&self.source.root_id, &self.group_id)
    }

    /// Human label: the archive's file name, or the folder name
    pub fn label(&self) -> &str {
        if self.is_archive {
            if let Some(first) = self.members.first() {
                return &first.name;
            }
        }
        &self.folder_name
    }

    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|m| m.size_bytes).sum()
    }
}

/// `(rootId, groupId)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub root_id: String,
    pub group_id: String,
}

impl GroupKey {
    pub fn new(root_id: &str, group_id: &str) -> Self {
        Self {
            root_id: root_id.to_string(),
            group_id: group_id.to_string(),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.root_id, self.group_id)
    }
}

/// rootId → groupId → ChartGroup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    roots: BTreeMap<String, BTreeMap<String, ChartGroup>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the group's own root, replacing any group with the same id
    pub fn insert(&mut self, group: ChartGroup) {
        self.roots
            .entry(group.source.root_id.clone())
            .or_default()
            .insert(group.group_id.clone(), group);
    }

    /// Make sure `root_id` is present even with no groups
    pub fn touch_root(&mut self, root_id: &str) {
        self.roots.entry(root_id.to_string()).or_default();
    }

    pub fn get(&self, key: &GroupKey) -> Option<&ChartGroup> {
        self.roots.get(&key.root_id)?.get(&key.group_id)
    }

    pub fn remove(&mut self, key: &GroupKey) -> Option<ChartGroup> {
        self.roots.get_mut(&key.root_id)?.remove(&key.group_id)
    }

    pub fn contains_root(&self, root_id: &str) -> bool {
        self.roots.contains_key(root_id)
    }

    pub fn root_ids(&self) -> impl Iterator<Item = &String> {
        self.roots.keys()
    }

    pub fn groups_in(&self, root_id: &str) -> Option<&BTreeMap<String, ChartGroup>> {
        self.roots.get(root_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ChartGroup> {
        self.roots.values().flat_map(|groups| groups.values())
    }

    pub fn keys(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.groups().map(ChartGroup::key)
    }

    /// Number of groups across all roots
    pub fn len(&self) -> usize {
        self.roots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<ChartGroup> for Snapshot {
    fn from_iter<T: IntoIterator<Item = ChartGroup>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        for group in iter {
            snapshot.insert(group);
        }
        snapshot
    }
}
