//! Servers command implementation

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::models::ServerConfig;

#[derive(Args, Debug)]
pub struct ServersArgs {}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ServerOutput {
    name: String,
    transport: String,
    languages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    patterns: Vec<String>,
}

impl From<ServerConfig> for ServerOutput {
    fn from(server: ServerConfig) -> Self {
        Self {
            transport: server.transport.to_string(),
            name: server.name,
            languages: server.languages,
            patterns: server.patterns,
        }
    }
}

#[derive(Serialize)]
struct ServersResponse {
    builtin: bool,
    servers: Vec<ServerOutput>,
}

pub async fn execute(_args: ServersArgs, app: &App) -> Result<()> {
    let config = app.config();
    let response = ServersResponse {
        builtin: config.servers.is_empty(),
        servers: config
            .effective_servers()
            .into_iter()
            .map(ServerOutput::from)
            .collect(),
    };
    app.output.print_success_flat(response);
    Ok(())
}
