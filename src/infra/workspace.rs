//! Workspace file listing with .gitignore integration
//!
//! Uses the `ignore` crate (from ripgrep) for the walk. Serves
//! `workspace/xfiles`: every file under a base directory, no cap, stopping
//! early when the request is cancelled.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use crate::error::LspError;
use crate::models::FilesSettings;

/// Per-project ignore file, gitignore syntax
pub const IGNORE_FILE: &str = ".langlink/ignore";

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Use .gitignore files for filtering
    pub respect_gitignore: bool,
    /// Hidden files/directories (starting with .)
    pub include_hidden: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
        }
    }
}

impl From<&FilesSettings> for WalkOptions {
    fn from(settings: &FilesSettings) -> Self {
        Self {
            respect_gitignore: settings.respect_gitignore,
            include_hidden: settings.include_hidden,
        }
    }
}

/// Resolve an `xfiles` base against the workspace root.
///
/// Accepts a `file://` URI, an absolute path or a root-relative path.
pub fn resolve_base(root: &Path, base: Option<&str>) -> PathBuf {
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        None => root.to_path_buf(),
        Some(base) => {
            let path = crate::models::uri_to_path(base).unwrap_or_else(|| PathBuf::from(base));
            if path.is_absolute() {
                path
            } else {
                root.join(path)
            }
        }
    }
}

/// Build a walker for `base` honoring `root`'s ignore files
fn walk_builder(root: &Path, base: &Path, options: &WalkOptions) -> WalkBuilder {
    let mut builder = WalkBuilder::new(base);

    builder
        .hidden(!options.include_hidden)
        .git_ignore(options.respect_gitignore)
        .git_global(options.respect_gitignore)
        .git_exclude(options.respect_gitignore)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git");

    let ignore_path = root.join(IGNORE_FILE);
    if ignore_path.exists()
        && let Some(err) = builder.add_ignore(&ignore_path)
    {
        tracing::warn!("Failed to parse {}: {}", IGNORE_FILE, err);
    }

    builder
}

/// Every file under `base`, sorted. Blocking; see [`list_files`].
pub fn collect_files(
    root: &Path,
    base: &Path,
    options: &WalkOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, LspError> {
    let mut files = Vec::new();

    for entry in walk_builder(root, base, options).build() {
        if cancel.is_cancelled() {
            return Err(LspError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// List files off the async runtime.
pub async fn list_files(
    root: PathBuf,
    base: PathBuf,
    options: WalkOptions,
    cancel: CancellationToken,
) -> Result<Vec<PathBuf>, LspError> {
    if !base.is_dir() {
        return Err(LspError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", base.display()),
        )));
    }

    tokio::task::spawn_blocking(move || collect_files(&root, &base, &options, &cancel))
        .await
        .map_err(|e| LspError::Protocol(format!("File listing task failed: {e}")))?
}
