//! Domain models for Langlink

pub mod config;
pub mod document;
pub mod lsp;

pub use config::{FilesSettings, LanglinkConfig, LspSettings, ServerConfig, ServerTransport};
pub use document::{
    Document, DocumentChange, DocumentEvent, DocumentFilter, DocumentSelector, DocumentVersion,
    SaveReason, TextChange, language_id_for_path,
};
pub use lsp::{Position, Range, TextEdit, path_to_uri, uri_to_path};
