//! Ad-hoc sources pasted as text
//!
//! Any text holding Drive links works: folder ids are picked out of the
//! URLs, and each becomes a source named after its own id.

use crate::model::{NodeKind, SourceRoot};
use crate::remote::RemoteStore;
use once_cell::sync::Lazy;
use regex::Regex;

static DRIVE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[01][a-zA-Z0-9_-]{10,}").expect("static regex"));

/// Drive ids in `text`, in order, without consecutive repeats
pub fn extract_drive_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for found in DRIVE_ID_RE.find_iter(text) {
        let id = &found.as_str()[1..];
        if ids.last().map(String::as_str) != Some(id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Turn ids into sources, asking the store whether each root is a file
pub async fn resolve_sources(store: &dyn RemoteStore, ids: &[String]) -> Vec<SourceRoot> {
    let mut sources = Vec::with_capacity(ids.len());
    for id in ids {
        let is_single_file_source = match store.get_node(id).await {
            Ok(node) => node.kind == NodeKind::File,
            Err(e) => {
                tracing::warn!(root_id = %id, error = %e, "Could not resolve ad-hoc source; treating it as a folder");
                false
            }
        };
        sources.push(SourceRoot {
            root_id: id.clone(),
            display_name: id.clone(),
            is_single_file_source,
            required_icon: None,
        });
    }
    tracing::info!(count = sources.len(), "Ad-hoc sources detected");
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteNode;
    use crate::remote::{ByteStream, RemoteError};
    use async_trait::async_trait;

    #[test]
    fn test_ids_are_extracted_and_deduplicated() {
        let text = "see https://drive.google.com/drive/folders/1AbCdEfGhIjK_l-m?usp=sharing \
                    and https://drive.google.com/drive/folders/1AbCdEfGhIjK_l-m again, \
                    plus drive.google.com/file/d/0ZyXwVuTsRqP/view and /2notAnId12345";

        let ids = extract_drive_ids(text);

        assert_eq!(ids, vec!["1AbCdEfGhIjK_l-m", "0ZyXwVuTsRqP"]);
    }

    #[test]
    fn test_short_ids_are_ignored() {
        assert!(extract_drive_ids("/1short and no links").is_empty());
    }

    struct OneFileStore;

    #[async_trait]
    impl RemoteStore for OneFileStore {
        async fn list_children(&self, _: &str) -> Result<Vec<RemoteNode>, RemoteError> {
            Ok(vec![])
        }

        async fn get_node(&self, node_id: &str) -> Result<RemoteNode, RemoteError> {
            match node_id {
                "1fileid00000" => Ok(RemoteNode::file(node_id, "pack.zip", 10, None)),
                "1folderid000" => Ok(RemoteNode::folder(node_id, "Folder")),
                _ => Err(RemoteError::NotFound(node_id.to_string())),
            }
        }

        async fn open_download_stream(&self, node_id: &str) -> Result<ByteStream, RemoteError> {
            Err(RemoteError::NotFound(node_id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_sources_are_resolved() {
        let ids = vec![
            "1fileid00000".to_string(),
            "1folderid000".to_string(),
            "1missing0000".to_string(),
        ];

        let sources = resolve_sources(&OneFileStore, &ids).await;

        let single: Vec<_> = sources.iter().map(|s| s.is_single_file_source).collect();
        assert_eq!(single, vec![true, false, false]);
        assert_eq!(sources[0].display_name, "1fileid00000");
    }
}
