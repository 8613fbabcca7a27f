//! Tolerant INI parsing for `song.ini` sidecars and `.chart` headers
//!
//! Section and key names are trimmed and lowercased. Lines that fit no rule
//! are kept as invalid lines instead of failing the parse.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static SECTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(.*)\]$").expect("static regex"));
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(.*)"$"#).expect("static regex"));

/// Longest invalid line kept in an issue description
const MAX_LINE_REPORT_CHARS: usize = 1000;

pub type IniSection = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    /// Pairs seen before any section header
    pub top_level: IniSection,
    pub sections: BTreeMap<String, IniSection>,
    /// Invalid lines, trimmed, in file order
    pub invalid_lines: Vec<String>,
}

impl IniDocument {
    /// Parse `text`. With `remove_quotes`, one pair of surrounding double
    /// quotes is stripped from values (the `.chart` header style).
    pub fn parse(text: &str, remove_quotes: bool) -> Self {
        let mut doc = IniDocument::default();
        let mut current: Option<String> = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                match SECTION_RE.captures(line) {
                    Some(caps) => {
                        let name = caps[1].trim().to_lowercase();
                        doc.sections.entry(name.clone()).or_default();
                        current = Some(name);
                    }
                    None => doc.invalid_lines.push(line.to_string()),
                }
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_lowercase();
                let mut value = value.trim().to_string();
                if remove_quotes {
                    if let Some(caps) = QUOTED_RE.captures(&value) {
                        value = caps[1].to_string();
                    }
                }
                let target = match &current {
                    Some(name) => doc.sections.entry(name.clone()).or_default(),
                    None => &mut doc.top_level,
                };
                target.insert(key, value);
                continue;
            }

            if line.starts_with('{') || line.starts_with('}') {
                continue;
            }

            doc.invalid_lines.push(line.to_string());
        }

        doc
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.get(name)
    }

    /// `Unsupported type of line: "<line>"` for each invalid line
    pub fn invalid_line_descriptions(&self) -> impl Iterator<Item = String> + '_ {
        self.invalid_lines.iter().map(|line| {
            let shown: String = line.chars().take(MAX_LINE_REPORT_CHARS).collect();
            format!("Unsupported type of line: \"{}\"", shown)
        })
    }
}
