//! Query command implementation
//!
//! One-shot hover, definition or references request against a single server,
//! reached over stdio or TCP.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::Value;

use crate::app::App;
use crate::cli::{OutputContext, ParsedLocation};
use crate::infra::lsp::protocol::{
    ReferenceContext, ReferenceParams, TextDocumentIdentifier, TextDocumentPositionParams,
};
use crate::infra::lsp::{ServerConnector, Session, SessionOptions};
use crate::models::{Document, LanglinkConfig, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    Hover,
    Definition,
    References,
}

impl QueryKind {
    fn method(self) -> &'static str {
        match self {
            Self::Hover => "textDocument/hover",
            Self::Definition => "textDocument/definition",
            Self::References => "textDocument/references",
        }
    }
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    pub kind: QueryKind,

    /// File path with position (file:line:column)
    pub location: String,

    /// Configured server to use (default: first one matching the file)
    #[arg(short, long, conflicts_with_all = ["address", "command"])]
    pub server: Option<String>,

    /// Connect to a server listening on this address, e.g. 127.0.0.1:2088
    #[arg(long, conflicts_with = "command")]
    pub address: Option<String>,

    /// Spawn this server command and talk over stdio
    #[arg(long)]
    pub command: Option<String>,

    /// Exclude the declaration from references
    #[arg(long)]
    pub no_declaration: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct LocationOutput {
    path: String,
    line: u32,
    column: u32,
}

#[derive(Serialize)]
struct QueryResponse {
    kind: &'static str,
    server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locations: Option<Vec<LocationOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn pick_server(args: &QueryArgs, config: &LanglinkConfig, document: &Document) -> Result<ServerConfig> {
    let language = document.language_id.as_str();

    if let Some(address) = &args.address {
        return Ok(ServerConfig::tcp(address.clone(), address.clone(), &[language]));
    }
    if let Some(command) = &args.command {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("Empty server command"))?;
        let mut server = ServerConfig::stdio(program.clone(), program, &[language]);
        if let crate::models::ServerTransport::Stdio { args, .. } = &mut server.transport {
            args.extend(parts);
        }
        return Ok(server);
    }
    if let Some(name) = &args.server {
        return config
            .server(name)
            .ok_or_else(|| anyhow!("Unknown server: {name}"));
    }

    config
        .effective_servers()
        .into_iter()
        .find(|s| s.selector().matches(language, &document.uri))
        .ok_or_else(|| anyhow!("No configured server handles '{language}' files"))
}

fn params(kind: QueryKind, uri: &str, location: &ParsedLocation, include_declaration: bool) -> Result<Value> {
    let position = TextDocumentPositionParams {
        text_document: TextDocumentIdentifier::new(uri),
        position: location.position(),
    };
    let value = match kind {
        QueryKind::References => serde_json::to_value(ReferenceParams {
            position,
            context: ReferenceContext {
                include_declaration,
            },
        })?,
        _ => serde_json::to_value(position)?,
    };
    Ok(value)
}

/// Plain text of a hover result: `MarkupContent`, `MarkedString` or a list of them
fn hover_text(result: &Value) -> Option<String> {
    fn text(contents: &Value) -> Option<String> {
        match contents {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("value").and_then(Value::as_str).map(str::to_string),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(text).collect();
                (!parts.is_empty()).then(|| parts.join("\n\n"))
            }
            _ => None,
        }
    }
    result.get("contents").and_then(text).filter(|t| !t.is_empty())
}

/// Flatten `Location`, `Location[]` or `LocationLink[]`
fn locations(result: &Value, ctx: &OutputContext) -> Vec<LocationOutput> {
    let items: Vec<&Value> = match result {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![result],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| {
            let uri = item
                .get("uri")
                .or_else(|| item.get("targetUri"))?
                .as_str()?;
            let start = item
                .get("range")
                .or_else(|| item.get("targetSelectionRange"))?
                .get("start")?;
            Some(LocationOutput {
                path: ctx.display_uri(uri),
                line: start.get("line")?.as_u64()? as u32 + 1,
                column: start.get("character")?.as_u64()? as u32 + 1,
            })
        })
        .collect()
}

pub async fn execute(args: QueryArgs, app: &App) -> Result<()> {
    let ctx = &app.output;
    let location = ParsedLocation::parse(&args.location)?.resolve(app.root())?;

    let host = app.host(false);
    let document = host.open_file(&location.file).await?;
    let server = pick_server(&args, app.config(), &document)?;

    let connector = ServerConnector::new(server.transport.clone(), app.root());
    let options = SessionOptions::for_server(&server, &app.config().files);
    let session = Session::new(&server, Arc::new(connector), host, options);

    if let Err(e) = session.start().await {
        ctx.print_error(&e.to_string());
        return Ok(());
    }

    let result = session
        .request::<Value>(
            args.kind.method(),
            Some(params(args.kind, &document.uri, &location, !args.no_declaration)?),
            None,
        )
        .await;
    if let Err(e) = session.stop().await {
        tracing::warn!("Error stopping {}: {}", server.name, e);
    }

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            ctx.print_error(&e.to_string());
            return Ok(());
        }
    };

    let kind = args.kind.method();
    let response = match args.kind {
        QueryKind::Hover => {
            let content = hover_text(&result);
            QueryResponse {
                kind,
                server: server.name,
                message: content
                    .is_none()
                    .then(|| "No hover information available".to_string()),
                content,
                locations: None,
            }
        }
        QueryKind::Definition | QueryKind::References => {
            let found = locations(&result, ctx);
            QueryResponse {
                kind,
                server: server.name,
                content: None,
                message: found
                    .is_empty()
                    .then(|| "No locations found".to_string()),
                locations: Some(found),
            }
        }
    };
    ctx.print_success_flat(response);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use serde_json::json;

    fn args(server: Option<&str>, address: Option<&str>, command: Option<&str>) -> QueryArgs {
        QueryArgs {
            kind: QueryKind::Hover,
            location: "a.go:1:1".to_string(),
            server: server.map(str::to_string),
            address: address.map(str::to_string),
            command: command.map(str::to_string),
            no_declaration: false,
        }
    }

    fn go_document() -> Document {
        Document::new("file:///w/a.go", "go", 1, "package a")
    }

    #[test]
    fn test_pick_server_by_language() {
        let server = pick_server(&args(None, None, None), &LanglinkConfig::default(), &go_document())
            .unwrap();
        assert_eq!(server.name, "langserver-go");
    }

    #[test]
    fn test_pick_server_overrides() {
        let config = LanglinkConfig::default();
        let tcp = pick_server(&args(None, Some("127.0.0.1:4389"), None), &config, &go_document())
            .unwrap();
        assert!(tcp.selector().matches("go", "file:///w/a.go"));

        let stdio = pick_server(&args(None, None, Some("gopls -mode stdio")), &config, &go_document())
            .unwrap();
        assert_eq!(
            stdio.transport,
            crate::models::ServerTransport::Stdio {
                command: "gopls".to_string(),
                args: vec!["-mode".to_string(), "stdio".to_string()],
            }
        );

        assert!(pick_server(&args(Some("nope"), None, None), &config, &go_document()).is_err());
    }

    #[test]
    fn test_reference_params_include_context() {
        let location = ParsedLocation {
            file: PathBuf::from("/w/a.go"),
            line: 3,
            column: 7,
        };
        let value = params(QueryKind::References, "file:///w/a.go", &location, true).unwrap();
        assert_eq!(value["position"], json!({ "line": 2, "character": 6 }));
        assert_eq!(value["context"]["includeDeclaration"], true);
        assert_eq!(value["textDocument"]["uri"], "file:///w/a.go");
    }

    #[test]
    fn test_hover_text_shapes() {
        assert_eq!(
            hover_text(&json!({ "contents": { "kind": "markdown", "value": "**x**" } })),
            Some("**x**".to_string())
        );
        assert_eq!(
            hover_text(&json!({ "contents": ["a", { "language": "go", "value": "b" }] })),
            Some("a\n\nb".to_string())
        );
        assert_eq!(hover_text(&json!({ "contents": "" })), None);
        assert_eq!(hover_text(&Value::Null), None);
    }

    #[test]
    fn test_locations_shapes() {
        let ctx = OutputContext::new(PathBuf::from("/w"));
        let range = json!({ "start": { "line": 0, "character": 4 }, "end": { "line": 0, "character": 5 } });

        let single = locations(&json!({ "uri": "file:///w/a.go", "range": range }), &ctx);
        assert_eq!(
            single,
            vec![LocationOutput {
                path: "a.go".to_string(),
                line: 1,
                column: 5
            }]
        );

        let links = locations(
            &json!([{ "targetUri": "file:///w/b.go", "targetRange": range, "targetSelectionRange": range }]),
            &ctx,
        );
        assert_eq!(links[0].path, "b.go");
        assert!(locations(&Value::Null, &ctx).is_empty());
    }
}
