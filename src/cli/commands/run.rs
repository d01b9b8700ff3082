//! Run command implementation
//!
//! Start sessions for the configured servers, announce the given files,
//! collect diagnostics for a while and shut everything down.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::infra::lsp::SessionManager;
use crate::infra::lsp::protocol::LspDiagnostic;
use crate::models::LanglinkConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Files to open before the servers start
    pub files: Vec<PathBuf>,

    /// Only start these servers (repeatable)
    #[arg(short, long = "server")]
    pub servers: Vec<String>,

    /// How long to wait for diagnostics, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub wait_ms: u64,

    /// Answer retry prompts on the terminal
    #[arg(short, long)]
    pub interactive: bool,
}

#[derive(Serialize)]
struct ServerOutput {
    name: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct DiagnosticOutput {
    line: u32,
    column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<String>,
    message: String,
}

impl From<&LspDiagnostic> for DiagnosticOutput {
    fn from(d: &LspDiagnostic) -> Self {
        Self {
            line: d.range.start.line + 1,
            column: d.range.start.character + 1,
            severity: d.severity.map(|s| format!("{s:?}").to_lowercase()),
            message: d.message.clone(),
        }
    }
}

#[derive(Serialize)]
struct RunResponse {
    servers: Vec<ServerOutput>,
    opened: Vec<String>,
    diagnostics: BTreeMap<String, Vec<DiagnosticOutput>>,
}

/// Configuration restricted to the named servers
fn select_servers(config: &LanglinkConfig, names: &[String]) -> Result<LanglinkConfig> {
    let mut selected = config.clone();
    if names.is_empty() {
        return Ok(selected);
    }
    for name in names {
        if config.server(name).is_none() {
            bail!("Unknown server: {name}");
        }
    }
    selected.servers = config
        .effective_servers()
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect();
    Ok(selected)
}

pub async fn execute(args: RunArgs, app: &App) -> Result<()> {
    let ctx = &app.output;
    let config = select_servers(app.config(), &args.servers)?;
    let host = app.host(args.interactive);

    let mut opened = Vec::new();
    for file in &args.files {
        let document = host.open_file(file).await?;
        opened.push(ctx.display_uri(&document.uri));
    }

    let manager = SessionManager::from_config(&config, host.clone());
    let results = manager.start_all().await;

    if results.iter().any(|(_, r)| r.is_ok()) {
        tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;
    }

    let states = manager.status();
    manager.stop_all().await;

    let servers = results
        .into_iter()
        .zip(states)
        .map(|((name, result), status)| ServerOutput {
            name,
            state: status.state.to_string(),
            error: result.err().map(|e| e.to_string()),
        })
        .collect();

    let diagnostics = host
        .diagnostics()
        .await
        .iter()
        .map(|(uri, list)| {
            (
                ctx.display_uri(uri),
                list.iter().map(DiagnosticOutput::from).collect(),
            )
        })
        .collect();

    ctx.print_success_flat(RunResponse {
        servers,
        opened,
        diagnostics,
    });
    Ok(())
}
