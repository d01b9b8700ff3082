//! JSON output for CLI commands
//!
//! Every command prints one `{ "success": ..., ... }` object on stdout.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::models::uri_to_path;

#[derive(Debug, Clone)]
pub struct OutputContext {
    /// Workspace root for relative paths
    root: PathBuf,
}

impl OutputContext {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the workspace root when inside it
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    /// `file://` URIs shown as relative paths; anything else unchanged
    pub fn display_uri(&self, uri: &str) -> String {
        uri_to_path(uri).map_or_else(|| uri.to_string(), |path| self.relative_path(&path))
    }

    /// Data fields at the top level next to `"success": true`
    pub fn print_success_flat<T: Serialize>(&self, data: T) {
        let mut response = serde_json::to_value(data).unwrap_or(serde_json::json!({}));
        if let Some(obj) = response.as_object_mut() {
            obj.insert("success".to_string(), serde_json::json!(true));
        }
        print_json(&response);
    }

    pub fn print_error(&self, message: &str) {
        print_json(&serde_json::json!({
            "success": false,
            "error": message
        }));
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        let ctx = OutputContext::new(PathBuf::from("/project"));
        assert_eq!(
            ctx.relative_path(Path::new("/project/src/main.go")),
            "src/main.go"
        );
        assert_eq!(ctx.relative_path(Path::new("/other/a.go")), "/other/a.go");
    }

    #[test]
    fn test_display_uri() {
        let ctx = OutputContext::new(PathBuf::from("/project"));
        assert_eq!(ctx.display_uri("file:///project/pkg/a.go"), "pkg/a.go");
        assert_eq!(ctx.display_uri("untitled:1"), "untitled:1");
    }
}
