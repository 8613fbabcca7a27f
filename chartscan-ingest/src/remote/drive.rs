//! Google Drive v3 implementation of [`RemoteStore`]
//!
//! Every request goes through the shared [`CallLimiter`]. Metadata calls are
//! retried per [`RetryPolicy::metadata`]; content streams are opened once and
//! restarted by the fetcher. Listing follows `nextPageToken` until exhausted.

use super::{retry_with_backoff, ByteStream, CallLimiter, RemoteError, RemoteStore, RetryPolicy};
use crate::model::{extension_of, AliasTarget, NodeKind, RemoteNode};
use crate::naming::sanitize_filename;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";
const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";
const FILE_FIELDS: &str =
    "id,name,mimeType,size,md5Checksum,modifiedTime,originalFilename,shortcutDetails";

/// Drive credentials
#[derive(Debug, Clone)]
pub enum DriveAuth {
    /// Public files only; sent as the `key` query parameter
    ApiKey(String),
    /// OAuth access token; sent as a bearer header
    AccessToken(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    size: Option<String>,
    md5_checksum: Option<String>,
    modified_time: Option<DateTime<Utc>>,
    original_filename: Option<String>,
    shortcut_details: Option<ShortcutDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortcutDetails {
    target_id: String,
    #[serde(default)]
    target_mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Drive v3 REST client
pub struct DriveClient {
    http: Client,
    auth: DriveAuth,
    base_url: String,
    limiter: CallLimiter,
    metadata_policy: RetryPolicy,
}

impl DriveClient {
    pub fn new(auth: DriveAuth, limiter: CallLimiter) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            auth,
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter,
            metadata_policy: RetryPolicy::metadata(),
        })
    }

    /// Point at a different endpoint (e.g. a local mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            DriveAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            DriveAuth::AccessToken(token) => request.bearer_auth(token),
        }
    }

    /// One limited, unretried GET returning JSON
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let _permit = self.limiter.acquire().await;
        let request = self.authorize(self.http.get(url).query(query));
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    async fn list_page(
        &self,
        node_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, RemoteError> {
        let url = format!("{}/files", self.base_url);
        let q = format!("'{}' in parents and trashed = false", node_id);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut query = vec![
            ("q", q.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", "1000"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        retry_with_backoff("drive.files.list", &self.metadata_policy, || {
            self.get_json::<FileList>(&url, &query)
        })
        .await
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list_children(&self, node_id: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(node_id, page_token.as_deref()).await?;
            nodes.extend(page.files.into_iter().map(node_from_drive_file));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(folder_id = node_id, children = nodes.len(), "Listed folder");
        Ok(nodes)
    }

    async fn get_node(&self, node_id: &str) -> Result<RemoteNode, RemoteError> {
        let url = format!("{}/files/{}", self.base_url, node_id);
        let query = [("fields", FILE_FIELDS), ("supportsAllDrives", "true")];

        let file = retry_with_backoff("drive.files.get", &self.metadata_policy, || {
            self.get_json::<DriveFile>(&url, &query)
        })
        .await?;
        Ok(node_from_drive_file(file))
    }

    async fn open_download_stream(&self, node_id: &str) -> Result<ByteStream, RemoteError> {
        let url = format!("{}/files/{}", self.base_url, node_id);
        let query = [("alt", "media"), ("supportsAllDrives", "true")];

        // Single attempt; the caller restarts the whole file under its stream policy
        let response = {
            let _permit = self.limiter.acquire().await;
            self.authorize(self.http.get(&url).query(&query))
                .send()
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?
        };
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map_err(|e| RemoteError::Network(e.to_string()))
            .boxed())
    }
}

/// Maps a non-success response onto a [`RemoteError`]
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (message, reasons) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (
            envelope.error.message,
            envelope
                .error
                .errors
                .into_iter()
                .map(|e| e.reason)
                .collect::<Vec<_>>(),
        ),
        Err(_) => (body, Vec::new()),
    };

    Err(classify_status(status, message, &reasons))
}

fn classify_status(status: StatusCode, message: String, reasons: &[String]) -> RemoteError {
    let rate_limited = reasons
        .iter()
        .any(|r| r == "rateLimitExceeded" || r == "userRateLimitExceeded");

    match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited(message),
        StatusCode::FORBIDDEN if rate_limited => RemoteError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        other => RemoteError::Status {
            status: other.as_u16(),
            message,
        },
    }
}

fn node_from_drive_file(file: DriveFile) -> RemoteNode {
    let kind = if file.mime_type == FOLDER_MIME {
        NodeKind::Folder
    } else if file.mime_type == SHORTCUT_MIME {
        NodeKind::Alias
    } else if file.mime_type.starts_with(NATIVE_MIME_PREFIX) {
        NodeKind::Unsupported
    } else {
        NodeKind::File
    };

    let name = match kind {
        NodeKind::File => sanitize_filename(&real_file_name(
            &file.name,
            file.original_filename.as_deref(),
        )),
        _ => file.name,
    };

    let alias_target = file.shortcut_details.map(|details| AliasTarget {
        is_folder: details.target_mime_type == FOLDER_MIME,
        id: details.target_id,
    });

    RemoteNode {
        id: file.id,
        kind,
        extension: if kind == NodeKind::File {
            extension_of(&name)
        } else {
            None
        },
        name,
        size_bytes: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
        content_hash: file.md5_checksum,
        modified_time: file.modified_time,
        alias_target,
    }
}

/// Restores the extension from `originalFilename` when the display name lost it
fn real_file_name(name: &str, original_filename: Option<&str>) -> String {
    let original_ext = original_filename.and_then(extension_of);
    match original_ext {
        Some(ext) if extension_of(name).as_deref() != Some(ext.as_str()) => {
            format!("{}.{}", name, ext)
        }
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RemoteNode {
        node_from_drive_file(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_file_mapping() {
        let node = parse(
            r#"{"id":"f1","name":"song.ogg","mimeType":"audio/ogg","size":"2048",
                "md5Checksum":"abc","modifiedTime":"2021-03-04T05:06:07.000Z"}"#,
        );
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.extension.as_deref(), Some("ogg"));
        assert_eq!(node.size_bytes, 2048);
        assert_eq!(node.content_hash.as_deref(), Some("abc"));
        assert!(node.modified_time.is_some());
    }

    #[test]
    fn test_folder_and_native_doc_mapping() {
        let folder = parse(r#"{"id":"d","name":"Charts","mimeType":"application/vnd.google-apps.folder"}"#);
        assert!(folder.is_folder());
        assert_eq!(folder.extension, None);

        let doc = parse(r#"{"id":"g","name":"Notes","mimeType":"application/vnd.google-apps.document"}"#);
        assert_eq!(doc.kind, NodeKind::Unsupported);
    }

    #[test]
    fn test_shortcut_mapping() {
        let node = parse(
            r#"{"id":"s","name":"Link","mimeType":"application/vnd.google-apps.shortcut",
                "shortcutDetails":{"targetId":"t","targetMimeType":"application/vnd.google-apps.folder"}}"#,
        );
        assert_eq!(node.kind, NodeKind::Alias);
        assert_eq!(
            node.alias_target,
            Some(AliasTarget {
                id: "t".to_string(),
                is_folder: true
            })
        );
    }

    #[test]
    fn test_real_file_name_restores_extension() {
        assert_eq!(real_file_name("My Song", Some("My Song.zip")), "My Song.zip");
        assert_eq!(real_file_name("pack.zip", Some("pack.zip")), "pack.zip");
        assert_eq!(real_file_name("pack.zip", None), "pack.zip");
        assert_eq!(real_file_name("a.rar", Some("a.7z")), "a.rar.7z");
    }

    #[test]
    fn test_file_names_are_sanitized() {
        let node = parse(r#"{"id":"f","name":"What?.chart","mimeType":"text/plain"}"#);
        assert_eq!(node.name, "What？.chart");
    }

    #[test]
    fn test_status_classification() {
        let limited = classify_status(
            StatusCode::FORBIDDEN,
            "slow down".into(),
            &["userRateLimitExceeded".to_string()],
        );
        assert!(matches!(limited, RemoteError::RateLimited(_)));

        let denied = classify_status(StatusCode::FORBIDDEN, "no".into(), &[]);
        assert!(matches!(denied, RemoteError::Auth(_)));

        let server = classify_status(StatusCode::BAD_GATEWAY, "".into(), &[]);
        assert!(server.is_transient());
    }
}
