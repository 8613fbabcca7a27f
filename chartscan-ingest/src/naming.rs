//! File naming conventions, filename sanitizing and text decoding
//!
//! Classification mirrors what the game reads from a chart folder: one
//! notation file, audio stems with fixed names, optional art, video and a
//! `song.ini` sidecar.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];
pub const NOTATION_EXTENSIONS: &[&str] = &["chart", "mid"];
pub const AUDIO_EXTENSIONS: &[&str] = &["ogg", "mp3", "wav"];
const PREVIEW_EXTENSIONS: &[&str] = &["ogg", "mp3", "wav", "opus"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "svg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "webm", "ogv", "mpeg"];

const AUDIO_STEMS: &[&str] = &[
    "song", "guitar", "bass", "rhythm", "keys", "vocals", "vocals_1", "vocals_2", "drums",
    "drums_1", "drums_2", "drums_3", "drums_4", "crowd",
];

/// What a file in a chart folder is, judged by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Image,
    Notation,
    Audio,
    PreviewAudio,
    Ini,
    Video,
    Other,
}

/// Lowercase file stem (`Song.OGG` → `song`, `.ini` → `.ini`)
pub fn stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Lowercase extension without the dot, empty when there is none
pub fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn classify(name: &str) -> FileClass {
    let ext = extension(name);
    let ext = ext.as_str();
    let stem = stem(name);

    if IMAGE_EXTENSIONS.contains(&ext) {
        FileClass::Image
    } else if NOTATION_EXTENSIONS.contains(&ext) {
        FileClass::Notation
    } else if stem == "preview" && PREVIEW_EXTENSIONS.contains(&ext) {
        FileClass::PreviewAudio
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        FileClass::Audio
    } else if ext == "ini" {
        FileClass::Ini
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileClass::Video
    } else {
        FileClass::Other
    }
}

pub fn is_archive_extension(ext: &str) -> bool {
    ARCHIVE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_notation_extension(ext: &str) -> bool {
    NOTATION_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn has_chart_name(name: &str) -> bool {
    stem(name) == "notes"
}

pub fn has_ini_name(name: &str) -> bool {
    stem(name) == "song"
}

pub fn is_album_image(name: &str) -> bool {
    stem(name) == "album"
}

pub fn is_background_image(name: &str) -> bool {
    stem(name).starts_with("background")
}

pub fn is_valid_audio_stem(name: &str) -> bool {
    AUDIO_STEMS.contains(&stem(name).as_str())
}

/// Replaces characters that are invalid in file names with look-alikes.
/// An empty result becomes random hex.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' => '❮',
            '>' => '❯',
            ':' => '꞉',
            '"' => '\'',
            '/' => '／',
            '\\' => '⧵',
            '|' => '⏐',
            '?' => '？',
            '*' => '⁎',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
    } else {
        sanitized
    }
}

static STYLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*[^>]+>(.*)<\s*/\s*[^>]+>").expect("static regex"));

/// Strips paired rich-text tags: `<color=#AEFFFF>Aren</color> & Geo` → `Aren & Geo`
pub fn remove_style_tags(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = STYLE_TAG.replace_all(&current, "$1").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Text encoding a file was decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {encoding:?} text")]
pub struct TextDecodeError {
    pub encoding: TextEncoding,
}

/// Decodes chart and ini text: UTF-16 by BOM, then strict UTF-8, then Latin-1
pub fn decode_text(bytes: &[u8]) -> Result<(String, TextEncoding), TextDecodeError> {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, TextEncoding::Utf16Le, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, TextEncoding::Utf16Be, u16::from_be_bytes);
    }

    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok((text.to_string(), TextEncoding::Utf8)),
        Err(_) => Ok((
            bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Latin1,
        )),
    }
}

fn decode_utf16(
    bytes: &[u8],
    encoding: TextEncoding,
    to_unit: fn([u8; 2]) -> u16,
) -> Result<(String, TextEncoding), TextDecodeError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map(|text| (text, encoding))
        .map_err(|_| TextDecodeError { encoding })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_chart_folder_files() {
        assert_eq!(classify("notes.chart"), FileClass::Notation);
        assert_eq!(classify("NOTES.MID"), FileClass::Notation);
        assert_eq!(classify("song.ogg"), FileClass::Audio);
        assert_eq!(classify("preview.opus"), FileClass::PreviewAudio);
        assert_eq!(classify("preview.mp3"), FileClass::PreviewAudio);
        assert_eq!(classify("song.ini"), FileClass::Ini);
        assert_eq!(classify("album.PNG"), FileClass::Image);
        assert_eq!(classify("video.webm"), FileClass::Video);
        assert_eq!(classify("song.opus"), FileClass::Other);
        assert_eq!(classify("readme.txt"), FileClass::Other);
    }

    #[test]
    fn test_name_predicates() {
        assert!(has_chart_name("Notes.chart"));
        assert!(!has_chart_name("Song Title.chart"));
        assert!(has_ini_name("song.ini"));
        assert!(is_album_image("album.jpg"));
        assert!(is_background_image("background2.png"));
        assert!(is_valid_audio_stem("drums_3.ogg"));
        assert!(!is_valid_audio_stem("drums_5.ogg"));
        assert!(is_archive_extension("7Z"));
        assert!(!is_archive_extension("tar"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "AC／DC꞉ Live？");
        assert_eq!(sanitize_filename("\"Quoted\" <x>"), "'Quoted' ❮x❯");
        assert_eq!(sanitize_filename("trailing. "), "trailing");

        let random = sanitize_filename("...");
        assert_eq!(random.len(), 10);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_remove_style_tags() {
        assert_eq!(
            remove_style_tags("<color=#AEFFFF>Aren Eternal</color> & Geo"),
            "Aren Eternal & Geo"
        );
        assert_eq!(remove_style_tags("<b><i>Nested</i></b>"), "Nested");
        assert_eq!(remove_style_tags("No tags"), "No tags");
    }

    #[test]
    fn test_decode_text_encodings() {
        let (text, enc) = decode_text(b"\xEF\xBB\xBF[Song]").unwrap();
        assert_eq!(text, "[Song]");
        assert_eq!(enc, TextEncoding::Utf8);

        let (text, enc) = decode_text(&[0xFF, 0xFE, b'h', 0, b'i', 0]).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(enc, TextEncoding::Utf16Le);

        let (text, enc) = decode_text(b"caf\xE9").unwrap();
        assert_eq!(text, "café");
        assert_eq!(enc, TextEncoding::Latin1);

        // Lone surrogate
        assert!(decode_text(&[0xFF, 0xFE, 0x00, 0xD8]).is_err());
    }
}
