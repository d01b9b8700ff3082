//! CLI module for Langlink
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod location;
pub mod output;

pub use location::ParsedLocation;
pub use output::OutputContext;

use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, query::QueryArgs, run::RunArgs, servers::ServersArgs};

const LONG_ABOUT: &str = r#"
Langlink - Language Server Protocol client runtime

Langlink connects to language servers over stdio or TCP, runs the initialize
handshake, keeps open documents in sync and answers the files extension
(workspace/xfiles, textDocument/xcontent) from the local workspace.

QUICK START:
  1. Write a config:          langlink config init
  2. List servers:            langlink servers
  3. Start and collect:       langlink run src/main.go
  4. Ask one server:          langlink query hover src/main.go:10:5

QUERY EXAMPLES:
  langlink query definition src/api.ts:25:10
  langlink query references src/api.ts:25:10 --address 127.0.0.1:2088
  langlink query hover main.py:3:1 --command "pyls"
"#;

/// Langlink - Language Server Protocol client runtime
#[derive(Parser, Debug)]
#[command(name = "langlink")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(after_help = "Use 'langlink <COMMAND> --help' for more information about a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start sessions, open files and collect diagnostics
    Run(RunArgs),

    /// Hover, definition or references at a position
    Query(QueryArgs),

    /// List configured language servers
    Servers(ServersArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::query::QueryKind;

    #[test]
    fn test_parse_query() {
        let cli = Cli::parse_from([
            "langlink",
            "query",
            "references",
            "src/a.ts:3:4",
            "--address",
            "127.0.0.1:2088",
        ]);
        match cli.command {
            Commands::Query(args) => {
                assert_eq!(args.kind, QueryKind::References);
                assert_eq!(args.address.as_deref(), Some("127.0.0.1:2088"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_query_server_conflicts_with_address() {
        let result = Cli::try_parse_from([
            "langlink", "query", "hover", "a.go:1:1", "--server", "go", "--address", "x:1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["langlink", "run", "a.go", "b.go", "-s", "go", "--wait-ms", "10"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.servers, vec!["go".to_string()]);
                assert_eq!(args.wait_ms, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
