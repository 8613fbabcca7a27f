//! Test helper utilities
//!
//! An in-memory remote store and small chart fixtures for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chartscan_ingest::fetch::{ArchiveExtractor, ManualExtraction};
use chartscan_ingest::model::{RemoteNode, SourceRoot};
use chartscan_ingest::remote::{ByteStream, RemoteError, RemoteStore};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A chart with one tempo marker, no sections and no star power
pub const PLAIN_CHART: &str = "[Song]\n{\n  Resolution = 192\n}\n[SyncTrack]\n{\n  0 = B 120000\n}\n\
    [Events]\n{\n}\n[ExpertSingle]\n{\n  0 = N 0 0\n  192 = N 1 0\n}\n";

pub const PLAIN_INI: &str = "[song]\nname = Test Song\nartist = Test Band\ncharter = Tester\n";

/// Remote tree held in memory, keyed by node id
#[derive(Default)]
pub struct MemoryStore {
    nodes: HashMap<String, RemoteNode>,
    children: HashMap<String, Vec<RemoteNode>>,
    content: HashMap<String, Vec<u8>>,
    reject_credentials: bool,
    pub downloads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add folder `id` holding `children`
    pub fn folder(mut self, id: &str, name: &str, children: Vec<RemoteNode>) -> Self {
        self.nodes
            .entry(id.to_string())
            .or_insert_with(|| RemoteNode::folder(id, name));
        for child in &children {
            self.nodes.insert(child.id.clone(), child.clone());
        }
        self.children.insert(id.to_string(), children);
        self
    }

    /// Add downloadable bytes for file `id`
    pub fn content(mut self, id: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.content.insert(id.to_string(), bytes.into());
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<(), RemoteError> {
        if self.reject_credentials {
            return Err(RemoteError::Auth("invalid key".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_children(&self, node_id: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        self.check_auth()?;
        self.children
            .get(node_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(node_id.to_string()))
    }

    async fn get_node(&self, node_id: &str) -> Result<RemoteNode, RemoteError> {
        self.check_auth()?;
        self.nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(node_id.to_string()))
    }

    async fn open_download_stream(&self, node_id: &str) -> Result<ByteStream, RemoteError> {
        self.check_auth()?;
        let data = self
            .content
            .get(node_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(node_id.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(futures::stream::iter(vec![Ok(Bytes::from(data))]).boxed())
    }
}

/// Declines every manual extraction request
pub struct NoOperator;

#[async_trait]
impl ManualExtraction for NoOperator {
    async fn request(&self, _: &Path, _: &Path, _: u32) -> bool {
        false
    }
}

pub fn extractor() -> ArchiveExtractor {
    ArchiveExtractor::new(Box::new(NoOperator))
}

pub fn source(root_id: &str, name: &str) -> SourceRoot {
    SourceRoot {
        root_id: root_id.to_string(),
        display_name: name.to_string(),
        is_single_file_source: false,
        required_icon: None,
    }
}

pub fn file_node(id: &str, name: &str, content: &[u8]) -> RemoteNode {
    RemoteNode::file(id, name, content.len() as u64, Some(format!("hash-{}", id)))
}

/// Zip holding `files` at its top level
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
