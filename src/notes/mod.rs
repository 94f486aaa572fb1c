#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use glob::Pattern;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ConfigError;
use crate::{Result, VaultError};

/// A note file as seen by the indexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Vault-relative path with forward slashes
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub raw_content: String,
    /// Plain text with front matter and markdown syntax removed
    pub text: String,
    pub front_matter: BTreeMap<String, String>,
    pub modified_at: DateTime<Utc>,
    pub content_hash: String,
    pub excluded: bool,
}

impl Note {
    /// Build a note from raw file content
    #[inline]
    pub fn from_content(
        id: String,
        path: PathBuf,
        raw_content: String,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let (front_matter, body) = extract_front_matter(&raw_content);
        let text = markdown_to_text(body);
        let title = front_matter
            .get("title")
            .map(|t| t.trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| first_heading(body))
            .unwrap_or_else(|| file_stem(&path));
        let content_hash = content_hash(raw_content.as_bytes());

        Self {
            id,
            path,
            title,
            raw_content,
            text,
            front_matter,
            modified_at,
            content_hash,
            excluded: false,
        }
    }

    /// The note has no embeddable text
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Path exclusion rules built from the configured comma-separated patterns
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: Vec<ExclusionRule>,
}

#[derive(Debug, Clone)]
struct ExclusionRule {
    pattern: Pattern,
    /// Set when the pattern has no glob metacharacters; matches whole path components
    literal: Option<String>,
}

impl ExclusionRules {
    #[inline]
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> std::result::Result<Self, ConfigError> {
        let rules = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                let pattern = Pattern::new(p)
                    .map_err(|_| ConfigError::InvalidExclusionPattern(p.to_string()))?;
                let literal = (!p.contains(['*', '?', '[']))
                    .then(|| p.trim_matches('/').to_string());
                Ok(ExclusionRule { pattern, literal })
            })
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules })
    }

    /// Whether `path` (absolute or relative to `root`) matches any exclusion
    #[inline]
    pub fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.rules.iter().any(|rule| {
            if rule.pattern.matches_path(relative) {
                return true;
            }
            rule.literal.as_deref().is_some_and(|literal| {
                relative.starts_with(literal)
                    || relative.components().any(|c| match c {
                        Component::Normal(name) => name == literal,
                        _ => false,
                    })
            })
        })
    }

    /// Markdown file that is not excluded
    #[inline]
    pub fn is_eligible(&self, root: &Path, path: &Path) -> bool {
        is_markdown_file(path) && !self.is_excluded(root, path)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Check if a file is a markdown file
#[inline]
pub fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

/// Stable identifier for a note: its vault-relative path with forward slashes
#[inline]
pub fn note_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// SHA-256 hex digest of the raw bytes
#[inline]
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Read a note from disk. Missing or unreadable files surface as `FileRead`.
#[inline]
pub async fn read_note(root: &Path, path: &Path, rules: &ExclusionRules) -> Result<Note> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| VaultError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|source| VaultError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    let modified_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let raw_content = String::from_utf8_lossy(&bytes).into_owned();

    let mut note = Note::from_content(
        note_id(root, path),
        path.to_path_buf(),
        raw_content,
        modified_at,
    );
    note.excluded = rules.is_excluded(root, path);

    debug!(
        "Read note {} ({} bytes, {} chars of text)",
        note.id,
        bytes.len(),
        note.text.len()
    );
    Ok(note)
}

/// Enumerate eligible note files under `root`, pruning excluded directories
#[inline]
pub fn discover_notes(root: &Path, rules: &ExclusionRules) -> Vec<PathBuf> {
    discover_notes_under(root, root, rules)
}

/// Enumerate eligible note files in the vault folder `dir`
///
/// Exclusions are matched relative to the vault `root`.
#[inline]
pub fn discover_notes_under(root: &Path, dir: &Path, rules: &ExclusionRules) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !rules.is_excluded(root, entry.path()));

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && rules.is_eligible(root, entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => {
                warn!("Skipping unreadable vault entry: {}", e);
            }
        }
    }

    files.sort();
    files
}

/// Split YAML-style front matter (`key: value` lines between `---` fences) from the body
#[inline]
pub fn extract_front_matter(content: &str) -> (BTreeMap<String, String>, &str) {
    let mut metadata = BTreeMap::new();

    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (metadata, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return (metadata, body);
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                metadata.insert(key.to_string(), value.trim().to_string());
            }
        }
        offset += line.len();
    }

    // Unterminated fence: treat the whole file as body
    (BTreeMap::new(), content)
}

/// Render markdown to plain text
#[inline]
pub fn markdown_to_text(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut text = String::with_capacity(markdown.len());
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableRow
                | TagEnd::TableHead,
            ) => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    collapse_blank_lines(&text)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn first_heading(markdown: &str) -> Option<String> {
    let mut in_heading = false;
    let mut heading = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => in_heading = true,
            Event::End(TagEnd::Heading(_)) => {
                if !heading.trim().is_empty() {
                    return Some(heading.trim().to_string());
                }
                in_heading = false;
            }
            Event::Text(t) | Event::Code(t) if in_heading => heading.push_str(&t),
            _ => {}
        }
    }

    None
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First `max_chars` characters of `text`, with an ellipsis when cut
#[inline]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Cut `text` to at most `max_chars` characters without splitting a character
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
