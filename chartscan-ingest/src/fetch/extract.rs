//! Archive extraction with decoder fallback and a manual escape hatch
//!
//! Each format is tried against every registered [`Extractor`] that claims
//! it, in order. When all of them fail the operator is asked to extract by
//! hand, a bounded number of times.

use super::FetchError;
use async_trait::async_trait;
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How many times the operator is asked before the group fails
pub const MAX_MANUAL_PROMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
    SevenZip,
}

impl ArchiveFormat {
    /// Detect by magic bytes, falling back to the file extension
    pub fn detect(path: &Path) -> Option<Self> {
        let sniffed = infer::get_from_path(path)
            .ok()
            .flatten()
            .and_then(|kind| Self::from_extension(kind.extension()));
        sniffed.or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(Self::from_extension)
        })
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" => Some(Self::Zip),
            "rar" => Some(Self::Rar),
            "7z" => Some(Self::SevenZip),
            _ => None,
        }
    }
}

/// One way of unpacking an archive into a folder
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, format: ArchiveFormat) -> bool;

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), FetchError>;
}

/// Native zip decoder
pub struct ZipExtractor;

#[async_trait]
impl Extractor for ZipExtractor {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        format == ArchiveFormat::Zip
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), FetchError> {
        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || unzip(&archive, &dest))
            .await
            .map_err(|e| FetchError::extraction(Path::new(""), format!("Task join error: {}", e)))?
    }
}

fn unzip(archive_path: &Path, dest: &Path) -> Result<(), FetchError> {
    let file = fs::File::open(archive_path).map_err(|e| FetchError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| FetchError::extraction(archive_path, e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| FetchError::extraction(archive_path, e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(FetchError::extraction(
                archive_path,
                format!("Entry escapes destination: {}", entry.name()),
            ));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| FetchError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| FetchError::io(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| FetchError::io(&out_path, e))?;
    }
    Ok(())
}

/// Native 7z decoder
pub struct SevenZipExtractor;

#[async_trait]
impl Extractor for SevenZipExtractor {
    fn name(&self) -> &'static str {
        "sevenz"
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        format == ArchiveFormat::SevenZip
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), FetchError> {
        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || {
            sevenz_rust::decompress_file(&archive, &dest)
                .map_err(|e| FetchError::extraction(&archive, e.to_string()))
        })
        .await
        .map_err(|e| FetchError::extraction(Path::new(""), format!("Task join error: {}", e)))?
    }
}

/// External `7z x` command; handles every format including rar
pub struct ExternalExtractor {
    program: String,
}

impl ExternalExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ExternalExtractor {
    fn default() -> Self {
        Self::new("7z")
    }
}

#[async_trait]
impl Extractor for ExternalExtractor {
    fn name(&self) -> &'static str {
        "external-7z"
    }

    fn supports(&self, _format: ArchiveFormat) -> bool {
        true
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), FetchError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("x")
            .arg("-y")
            .arg(format!("-o{}", dest.display()))
            .arg(archive)
            .output()
            .await
            .map_err(|e| FetchError::extraction(archive, format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::extraction(
                archive,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// Asks an operator to extract an archive by hand
#[async_trait]
pub trait ManualExtraction: Send + Sync {
    /// Returns true once the operator reports the archive extracted
    async fn request(&self, archive: &Path, dest: &Path, attempt: u32) -> bool;
}

/// Prompts on stderr and waits for Enter on stdin
pub struct ConsolePrompt;

#[async_trait]
impl ManualExtraction for ConsolePrompt {
    async fn request(&self, archive: &Path, dest: &Path, attempt: u32) -> bool {
        if !std::io::stdin().is_terminal() {
            tracing::error!(
                archive = %archive.display(),
                "Automatic extraction failed and stdin is not a terminal; cannot ask for manual extraction"
            );
            return false;
        }

        eprintln!(
            "\nCould not extract {}\nExtract it manually into {} and press Enter to continue (attempt {}/{})",
            archive.display(),
            dest.display(),
            attempt,
            MAX_MANUAL_PROMPTS
        );
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        matches!(stdin.read_line(&mut line).await, Ok(n) if n > 0)
    }
}

/// Extracts archives in place and deletes them afterwards
pub struct ArchiveExtractor {
    extractors: Vec<Box<dyn Extractor>>,
    manual: Box<dyn ManualExtraction>,
    max_prompts: u32,
}

impl ArchiveExtractor {
    /// Native decoders first, then the external command
    pub fn new(manual: Box<dyn ManualExtraction>) -> Self {
        Self::with_extractors(
            vec![
                Box::new(ZipExtractor),
                Box::new(SevenZipExtractor),
                Box::new(ExternalExtractor::default()),
            ],
            manual,
        )
    }

    pub fn with_extractors(extractors: Vec<Box<dyn Extractor>>, manual: Box<dyn ManualExtraction>) -> Self {
        Self {
            extractors,
            manual,
            max_prompts: MAX_MANUAL_PROMPTS,
        }
    }

    /// Extract `archive` into `dest`, then delete the archive
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), FetchError> {
        let format = ArchiveFormat::detect(archive);
        let mut extracted = false;

        if let Some(format) = format {
            for extractor in self.extractors.iter().filter(|x| x.supports(format)) {
                match extractor.extract(archive, dest).await {
                    Ok(()) => {
                        tracing::debug!(archive = %archive.display(), extractor = extractor.name(), "Extracted");
                        extracted = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            archive = %archive.display(),
                            extractor = extractor.name(),
                            error = %e,
                            "Extraction attempt failed"
                        );
                    }
                }
            }
        } else {
            tracing::warn!(archive = %archive.display(), "Unrecognized archive format");
        }

        if !extracted {
            self.manual_extraction(archive, dest).await?;
        }

        if let Err(e) = tokio::fs::remove_file(archive).await {
            tracing::warn!(
                archive = %archive.display(),
                error = %e,
                "Failed to delete extracted archive"
            );
        }
        Ok(())
    }

    async fn manual_extraction(&self, archive: &Path, dest: &Path) -> Result<(), FetchError> {
        for attempt in 1..=self.max_prompts {
            if !self.manual.request(archive, dest, attempt).await {
                break;
            }
            if has_content_besides(dest, archive).await {
                tracing::info!(archive = %archive.display(), "Manual extraction confirmed");
                return Ok(());
            }
            tracing::warn!(dest = %dest.display(), attempt, "Folder still holds only the archive");
        }
        Err(FetchError::extraction(
            archive,
            "All extractors failed and manual extraction was not completed".to_string(),
        ))
    }
}

async fn has_content_besides(dir: &Path, archive: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path() != archive {
            return true;
        }
    }
    false
}
