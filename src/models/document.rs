//! Editor document model
//!
//! Documents are owned by the host editor. The runtime only observes them
//! through [`DocumentEvent`]s and snapshots, never mutating them.

use std::fmt;
use std::path::Path;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::lsp::{Range, uri_to_path};

/// Wire value reported for content that has no editor version (read from disk).
pub const UNKNOWN_VERSION: i32 = -1;

/// Version of a document as reported to a server.
///
/// Disk-sourced content has no editor version; it is reported as
/// [`DocumentVersion::Unknown`] rather than reusing a valid number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentVersion {
    Known(i32),
    Unknown,
}

impl DocumentVersion {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Known(version) => version,
            Self::Unknown => UNKNOWN_VERSION,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<i32> for DocumentVersion {
    fn from(version: i32) -> Self {
        if version < 0 {
            Self::Unknown
        } else {
            Self::Known(version)
        }
    }
}

impl Serialize for DocumentVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for DocumentVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::from)
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(version) => write!(f, "{version}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An editor-visible text buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl Document {
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            version,
            text: text.into(),
        }
    }
}

/// One edit inside a change event (`TextDocumentContentChangeEvent`).
///
/// A change without a range replaces the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_length: Option<u32>,
    pub text: String,
}

impl TextChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            range_length: None,
            text: text.into(),
        }
    }

    pub fn incremental(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            range_length: None,
            text: text.into(),
        }
    }
}

/// A document edit as observed from the editor: the deltas that were applied
/// and the resulting full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub uri: String,
    pub version: i32,
    pub changes: Vec<TextChange>,
    pub text: String,
}

/// Why a document is being saved (`TextDocumentSaveReason`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SaveReason {
    Manual = 1,
    AfterDelay = 2,
    FocusOut = 3,
}

/// Document lifecycle events published by the host editor.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    Opened(Document),
    Changed(DocumentChange),
    WillSave { uri: String, reason: SaveReason },
    Saved { uri: String, text: Option<String> },
    Closed { uri: String },
}

impl DocumentEvent {
    pub fn uri(&self) -> &str {
        match self {
            Self::Opened(doc) => &doc.uri,
            Self::Changed(change) => &change.uri,
            Self::WillSave { uri, .. } | Self::Saved { uri, .. } | Self::Closed { uri } => uri,
        }
    }
}

/// Infer an LSP language identifier from a file name.
///
/// Well-known extensions map to their canonical identifiers; anything else
/// reports the bare extension, and extension-less files are `plaintext`.
pub fn language_id_for_path(path: &Path) -> String {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return "plaintext".to_string();
    };

    let ext = ext.to_lowercase();
    let canonical = match ext.as_str() {
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "md" => "markdown",
        "sh" | "bash" => "shellscript",
        "yml" => "yaml",
        _ => return ext,
    };
    canonical.to_string()
}

// ============================================================================
// Document Selectors
// ============================================================================

/// Serialized document filter (`DocumentFilter` on the wire and in config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    language: Option<String>,
    scheme: Option<String>,
    pattern: Option<GlobMatcher>,
    invalid_pattern: bool,
}

impl CompiledFilter {
    fn compile(filter: &DocumentFilter) -> Self {
        let mut invalid_pattern = false;
        let pattern = filter.pattern.as_deref().and_then(|p| match Glob::new(p) {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                tracing::warn!("Invalid document filter pattern '{}': {}", p, e);
                invalid_pattern = true;
                None
            }
        });

        Self {
            language: filter.language.clone(),
            scheme: filter.scheme.clone(),
            pattern,
            invalid_pattern,
        }
    }

    fn matches(&self, language_id: &str, uri: &str) -> bool {
        if self.invalid_pattern {
            return false;
        }
        if let Some(language) = &self.language
            && language != language_id
        {
            return false;
        }
        if let Some(scheme) = &self.scheme
            && uri.split_once(':').map(|(s, _)| s) != Some(scheme.as_str())
        {
            return false;
        }
        if let Some(glob) = &self.pattern {
            return uri_to_path(uri).is_some_and(|path| glob.is_match(path));
        }
        true
    }
}

/// A compiled set of document filters. A document matches when any filter
/// matches it.
#[derive(Debug, Clone, Default)]
pub struct DocumentSelector {
    filters: Vec<CompiledFilter>,
}

impl DocumentSelector {
    pub fn new(filters: &[DocumentFilter]) -> Self {
        Self {
            filters: filters.iter().map(CompiledFilter::compile).collect(),
        }
    }

    /// Selector from a server config: one filter per language and per pattern.
    pub fn from_languages_and_patterns(languages: &[String], patterns: &[String]) -> Self {
        let filters: Vec<DocumentFilter> = languages
            .iter()
            .map(|language| DocumentFilter {
                language: Some(language.clone()),
                ..Default::default()
            })
            .chain(patterns.iter().map(|pattern| DocumentFilter {
                pattern: Some(pattern.clone()),
                ..Default::default()
            }))
            .collect();
        Self::new(&filters)
    }

    /// Parse a `documentSelector` value from registration options.
    ///
    /// Plain strings are treated as language identifiers.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let items = value.as_array()?;
        let filters: Vec<DocumentFilter> = items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(language) => Some(DocumentFilter {
                    language: Some(language.clone()),
                    ..Default::default()
                }),
                other => serde_json::from_value(other.clone()).ok(),
            })
            .collect();
        Some(Self::new(&filters))
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, language_id: &str, uri: &str) -> bool {
        self.filters.iter().any(|f| f.matches(language_id, uri))
    }
}
