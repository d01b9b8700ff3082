//! Files extension
//!
//! Lets a server without filesystem access ask the client for the workspace
//! file listing (`workspace/xfiles`) and for document content
//! (`textDocument/xcontent`). Content comes from the open buffer when the
//! editor has the document open, otherwise from disk.

use tokio_util::sync::CancellationToken;

use super::protocol::{
    ContentParams, DocumentVersion, FilesParams, TextDocumentIdentifier, TextDocumentItem,
};
use crate::error::LspError;
use crate::infra::workspace::resolve_base;
use crate::models::{language_id_for_path, path_to_uri, uri_to_path};
use crate::services::host::Host;

pub const XFILES: &str = "workspace/xfiles";
pub const XCONTENT: &str = "textDocument/xcontent";

/// `workspace/xfiles`: every file under `base` (default: workspace root)
pub async fn list_files(
    host: &dyn Host,
    params: FilesParams,
    cancel: CancellationToken,
) -> Result<Vec<TextDocumentIdentifier>, LspError> {
    let base = resolve_base(host.root(), params.base.as_deref());
    tracing::debug!("Listing files under {}", base.display());

    let files = tokio::select! {
        _ = cancel.cancelled() => return Err(LspError::Cancelled),
        files = host.list_files(&base, cancel.clone()) => files?,
    };

    Ok(files
        .iter()
        .map(|path| TextDocumentIdentifier::new(path_to_uri(path)))
        .collect())
}

/// `textDocument/xcontent`: open buffer state, or disk content with an
/// unknown version
pub async fn content(
    host: &dyn Host,
    params: ContentParams,
    cancel: CancellationToken,
) -> Result<TextDocumentItem, LspError> {
    let uri = params.text_document.uri;

    if let Some(document) = host.document(&uri).await {
        return Ok(TextDocumentItem::from(&document));
    }

    let path = uri_to_path(&uri)
        .ok_or_else(|| LspError::Protocol(format!("Cannot read content of {uri}")))?;

    let text = tokio::select! {
        _ = cancel.cancelled() => return Err(LspError::Cancelled),
        text = host.read_file(&path) => text?,
    };

    Ok(TextDocumentItem {
        language_id: language_id_for_path(&path),
        uri,
        version: DocumentVersion::Unknown,
        text,
    })
}
