//! Document synchronization bookkeeping
//!
//! Tracks which documents were announced to one server and the last version
//! sent for each, and stages full-text changes while the coalescing delay
//! runs. This type never writes to the wire; the session sends whatever
//! notification it returns while holding the lock around it, which keeps
//! open/change/save/close ordered per document.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use super::protocol::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, TextDocumentIdentifier, TextDocumentItem, TextDocumentSyncKind,
    VersionedTextDocumentIdentifier,
};
use crate::error::LspError;
use crate::models::{Document, DocumentChange, DocumentSelector, TextChange};

/// What to do with an editor change
#[derive(Debug)]
pub enum ChangeAction {
    /// Not announced to this server, or sync is off
    Ignore,
    /// Forward now
    Send(DidChangeTextDocumentParams),
    /// Full text staged; send once `token` is still live after the delay
    Staged {
        token: CancellationToken,
        generation: u64,
    },
}

#[derive(Debug)]
struct StagedChange {
    version: i32,
    text: String,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct DocumentSync {
    selector: DocumentSelector,
    kind: TextDocumentSyncKind,
    /// uri -> last version sent
    announced: HashMap<String, i32>,
    staged: HashMap<String, StagedChange>,
    next_generation: u64,
}

impl DocumentSync {
    pub fn new(selector: DocumentSelector) -> Self {
        Self {
            selector,
            kind: TextDocumentSyncKind::None,
            announced: HashMap::new(),
            staged: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Apply the sync kind negotiated during `initialize`
    pub fn configure(&mut self, kind: TextDocumentSyncKind) {
        self.kind = kind;
    }

    pub fn kind(&self) -> TextDocumentSyncKind {
        self.kind
    }

    pub fn is_announced(&self, uri: &str) -> bool {
        self.announced.contains_key(uri)
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    /// `didOpen` params the first time a matching document is seen.
    pub fn open(&mut self, document: &Document) -> Option<DidOpenTextDocumentParams> {
        if self.kind == TextDocumentSyncKind::None
            || self.announced.contains_key(&document.uri)
            || !self.selector.matches(&document.language_id, &document.uri)
        {
            return None;
        }

        self.announced
            .insert(document.uri.clone(), document.version);
        Some(DidOpenTextDocumentParams {
            text_document: TextDocumentItem::from(document),
        })
    }

    pub fn change(&mut self, change: &DocumentChange) -> Result<ChangeAction, LspError> {
        let Some(&last_sent) = self.announced.get(&change.uri) else {
            return Ok(ChangeAction::Ignore);
        };
        let newest = self
            .staged
            .get(&change.uri)
            .map_or(last_sent, |staged| staged.version.max(last_sent));
        if change.version < newest {
            return Err(LspError::StaleVersion {
                uri: change.uri.clone(),
                version: change.version,
                last_sent: newest,
            });
        }

        match self.kind {
            TextDocumentSyncKind::None => Ok(ChangeAction::Ignore),
            TextDocumentSyncKind::Incremental => {
                self.announced.insert(change.uri.clone(), change.version);
                Ok(ChangeAction::Send(did_change(
                    &change.uri,
                    change.version,
                    change.changes.clone(),
                )))
            }
            TextDocumentSyncKind::Full => {
                if let Some(previous) = self.staged.remove(&change.uri) {
                    previous.cancel.cancel();
                }
                self.next_generation += 1;
                let generation = self.next_generation;
                let token = CancellationToken::new();
                self.staged.insert(
                    change.uri.clone(),
                    StagedChange {
                        version: change.version,
                        text: change.text.clone(),
                        generation,
                        cancel: token.clone(),
                    },
                );
                Ok(ChangeAction::Staged { token, generation })
            }
        }
    }

    /// Release a staged change whose delay elapsed. Returns `None` when a
    /// newer edit, a flush or a close superseded it.
    pub fn take_staged(
        &mut self,
        uri: &str,
        generation: u64,
    ) -> Option<DidChangeTextDocumentParams> {
        if self.staged.get(uri)?.generation != generation {
            return None;
        }
        self.release(uri)
    }

    /// Send a staged change now, ahead of its delay.
    pub fn flush(&mut self, uri: &str) -> Option<DidChangeTextDocumentParams> {
        self.release(uri)
    }

    fn release(&mut self, uri: &str) -> Option<DidChangeTextDocumentParams> {
        let staged = self.staged.remove(uri)?;
        staged.cancel.cancel();
        if !self.announced.contains_key(uri) {
            return None;
        }
        self.announced.insert(uri.to_string(), staged.version);
        Some(did_change(
            uri,
            staged.version,
            vec![TextChange::full(staged.text)],
        ))
    }

    pub fn save(&self, uri: &str, text: Option<String>) -> Option<DidSaveTextDocumentParams> {
        if !self.announced.contains_key(uri) {
            return None;
        }
        Some(DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri),
            text,
        })
    }

    /// Forget the document and drop any staged change for it.
    pub fn close(&mut self, uri: &str) -> Option<DidCloseTextDocumentParams> {
        if let Some(staged) = self.staged.remove(uri) {
            staged.cancel.cancel();
        }
        self.announced.remove(uri)?;
        Some(DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri),
        })
    }

    /// Drop all state, e.g. when the session stops.
    pub fn reset(&mut self) {
        for (_, staged) in self.staged.drain() {
            staged.cancel.cancel();
        }
        self.announced.clear();
    }
}

fn did_change(uri: &str, version: i32, changes: Vec<TextChange>) -> DidChangeTextDocumentParams {
    DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier {
            uri: uri.to_string(),
            version,
        },
        content_changes: changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, Range};

    fn sync(kind: TextDocumentSyncKind) -> DocumentSync {
        let mut sync = DocumentSync::new(DocumentSelector::from_languages_and_patterns(
            &["typescript".to_string()],
            &[],
        ));
        sync.configure(kind);
        sync
    }

    fn doc(uri: &str, version: i32) -> Document {
        Document::new(uri, "typescript", version, "let x=1")
    }

    fn edit(uri: &str, version: i32, text: &str) -> DocumentChange {
        DocumentChange {
            uri: uri.to_string(),
            version,
            changes: vec![TextChange::incremental(
                Range::new(Position::new(0, 0), Position::new(0, 0)),
                "x",
            )],
            text: text.to_string(),
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        assert!(sync.open(&doc("file:///a.ts", 1)).is_some());
        assert!(sync.open(&doc("file:///a.ts", 1)).is_none());
        assert_eq!(sync.announced_count(), 1);
    }

    #[test]
    fn test_open_respects_selector_and_sync_none() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        let go = Document::new("file:///main.go", "go", 1, "package main");
        assert!(sync.open(&go).is_none());

        let mut off = self::sync(TextDocumentSyncKind::None);
        assert!(off.open(&doc("file:///a.ts", 1)).is_none());
    }

    #[test]
    fn test_change_for_unannounced_uri_is_ignored() {
        let mut sync = sync(TextDocumentSyncKind::Incremental);
        let action = sync.change(&edit("file:///a.ts", 2, "y")).unwrap();
        assert!(matches!(action, ChangeAction::Ignore));
    }

    #[test]
    fn test_incremental_forwards_deltas() {
        let mut sync = sync(TextDocumentSyncKind::Incremental);
        sync.open(&doc("file:///a.ts", 1));
        match sync.change(&edit("file:///a.ts", 2, "xlet x=1")).unwrap() {
            ChangeAction::Send(params) => {
                assert_eq!(params.text_document.version, 2);
                assert!(params.content_changes[0].range.is_some());
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_version_is_rejected() {
        let mut sync = sync(TextDocumentSyncKind::Incremental);
        sync.open(&doc("file:///a.ts", 5));
        let err = sync.change(&edit("file:///a.ts", 4, "")).unwrap_err();
        assert!(matches!(err, LspError::StaleVersion { last_sent: 5, .. }));
    }

    #[test]
    fn test_full_sync_keeps_only_latest_staged_text() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        sync.open(&doc("file:///a.ts", 1));

        let mut first_token = None;
        let mut last_generation = 0;
        for (version, text) in [(2, "a"), (3, "ab"), (4, "abc")] {
            match sync.change(&edit("file:///a.ts", version, text)).unwrap() {
                ChangeAction::Staged { token, generation } => {
                    first_token.get_or_insert(token);
                    last_generation = generation;
                }
                other => panic!("expected staged, got {other:?}"),
            }
        }

        assert!(first_token.unwrap().is_cancelled());
        assert!(sync.take_staged("file:///a.ts", last_generation - 1).is_none());

        let params = sync.take_staged("file:///a.ts", last_generation).unwrap();
        assert_eq!(params.text_document.version, 4);
        assert_eq!(params.content_changes, vec![TextChange::full("abc")]);
        assert!(sync.take_staged("file:///a.ts", last_generation).is_none());
    }

    #[test]
    fn test_close_discards_staged_change() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        sync.open(&doc("file:///a.ts", 1));
        let ChangeAction::Staged { token, generation } =
            sync.change(&edit("file:///a.ts", 2, "b")).unwrap()
        else {
            panic!("expected staged change");
        };

        assert!(sync.close("file:///a.ts").is_some());
        assert!(token.is_cancelled());
        assert!(sync.take_staged("file:///a.ts", generation).is_none());
        assert!(sync.close("file:///a.ts").is_none());
    }

    #[test]
    fn test_flush_releases_staged_change_once() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        sync.open(&doc("file:///a.ts", 1));
        sync.change(&edit("file:///a.ts", 2, "b")).unwrap();

        let params = sync.flush("file:///a.ts").unwrap();
        assert_eq!(params.text_document.version, 2);
        assert!(sync.flush("file:///a.ts").is_none());
    }

    #[test]
    fn test_save_only_for_announced() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        assert!(sync.save("file:///a.ts", None).is_none());
        sync.open(&doc("file:///a.ts", 1));
        let params = sync.save("file:///a.ts", Some("t".to_string())).unwrap();
        assert_eq!(params.text.as_deref(), Some("t"));
    }

    #[test]
    fn test_reset_cancels_everything() {
        let mut sync = sync(TextDocumentSyncKind::Full);
        sync.open(&doc("file:///a.ts", 1));
        let ChangeAction::Staged { token, .. } =
            sync.change(&edit("file:///a.ts", 2, "b")).unwrap()
        else {
            panic!("expected staged change");
        };
        sync.reset();
        assert!(token.is_cancelled());
        assert!(!sync.is_announced("file:///a.ts"));
    }
}
