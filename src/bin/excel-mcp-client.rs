//! excel-mcp-client: command-line client for the excel-mcp server
//!
//! Starts an `excel-mcp` server on a workbook, runs one command against it
//! and shuts it down again.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

use excel_mcp::config::{self, Config};
use excel_mcp::mcp::host::{sibling_server_path, HostOptions, ProcessHost, SERVER_BINARY};
use excel_mcp::mcp::types::{ToolCallResult, ToolContent};
use excel_mcp::mcp::{ClientError, Tool};

/// Command-line client for the excel-mcp server.
#[derive(Parser, Debug)]
#[command(name = "excel-mcp-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workbook to open
    #[arg(short, long, value_name = "PATH", env = "EXCEL_MCP_WORKBOOK")]
    workbook: Option<PathBuf>,

    /// Server executable (defaults to the excel-mcp next to this client)
    #[arg(short, long, value_name = "PATH", env = "EXCEL_MCP_SERVER")]
    server: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the server's tools
    Tools,
    /// Show the worksheets and tables of the workbook
    List,
    /// Search rows for a text
    Search {
        /// Text to look for
        query: String,
        /// Only search this worksheet
        #[arg(long)]
        worksheet: Option<String>,
        /// Only search this table
        #[arg(long)]
        table: Option<String>,
        /// Matches per page
        #[arg(long)]
        limit: Option<i64>,
        /// Match case exactly
        #[arg(long)]
        case_sensitive: bool,
        /// Continue from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Show rows of a worksheet or table
    Preview {
        /// Worksheet to preview
        worksheet: String,
        /// Table on the worksheet
        #[arg(long)]
        table: Option<String>,
        /// Rows per page
        #[arg(long)]
        rows: Option<i64>,
        /// Continue from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },
    /// List the server's resources
    Resources,
    /// Read a resource
    Read {
        /// Resource URI, e.g. excel://workbook
        uri: String,
    },
    /// Call any tool with JSON arguments
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Picks the server executable: flag or environment, configuration, the
/// binary next to this one, then `excel-mcp` on `PATH`.
fn resolve_server(args_server: Option<PathBuf>, cfg: &Config) -> PathBuf {
    args_server
        .or_else(|| cfg.client.server_path.clone())
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| sibling_server_path(&exe))
        })
        .unwrap_or_else(|| PathBuf::from(SERVER_BINARY))
}

/// Arguments of a tool call, leaving out options that were not given.
fn tool_arguments(pairs: Vec<(&str, Option<Value>)>) -> Value {
    let map: Map<String, Value> = pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect();
    Value::Object(map)
}

/// Maps a command to the tool call it stands for.
fn command_call(command: Command) -> Result<(String, Value), String> {
    let call = match command {
        Command::List => (Tool::ListStructure.name().to_string(), json!({})),
        Command::Search {
            query,
            worksheet,
            table,
            limit,
            case_sensitive,
            cursor,
        } => (
            Tool::Search.name().to_string(),
            tool_arguments(vec![
                ("query", Some(json!(query))),
                ("worksheet", worksheet.map(Value::from)),
                ("table", table.map(Value::from)),
                ("limit", limit.map(Value::from)),
                ("caseSensitive", case_sensitive.then_some(Value::Bool(true))),
                ("cursor", cursor.map(Value::from)),
            ]),
        ),
        Command::Preview {
            worksheet,
            table,
            rows,
            cursor,
        } => (
            Tool::PreviewTable.name().to_string(),
            tool_arguments(vec![
                ("worksheet", Some(json!(worksheet))),
                ("table", table.map(Value::from)),
                ("rows", rows.map(Value::from)),
                ("cursor", cursor.map(Value::from)),
            ]),
        ),
        Command::Call { tool, arguments } => {
            let arguments: Value = serde_json::from_str(&arguments)
                .map_err(|e| format!("Tool arguments are not valid JSON: {e}"))?;
            if !arguments.is_object() {
                return Err("Tool arguments must be a JSON object".to_string());
            }
            (tool, arguments)
        }
        Command::Tools | Command::Resources | Command::Read { .. } => {
            return Err("not a tool call".to_string());
        }
    };
    Ok(call)
}

fn print_tool_result(result: &ToolCallResult) -> ExitCode {
    for item in &result.content {
        let text = match item {
            ToolContent::Text { text } => text.clone(),
            ToolContent::Json { json } => {
                serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string())
            }
        };
        if result.is_error {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }

    if result.is_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(host: &mut ProcessHost, command: Command) -> Result<ExitCode, ClientError> {
    let client = host.client();

    match command {
        Command::Tools => {
            for tool in client.list_tools().await?.tools {
                println!("{}\n    {}", tool.name, tool.description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Resources => {
            for resource in client.list_resources().await?.resources {
                println!("{}\t{}\t{}", resource.uri, resource.mime_type, resource.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Read { uri } => {
            for contents in client.read_resource(&uri).await?.contents {
                println!("{}", contents.text);
            }
            Ok(ExitCode::SUCCESS)
        }
        command => match command_call(command) {
            Ok((tool, arguments)) => {
                let result = client.call_tool(&tool, arguments).await?;
                Ok(print_tool_result(&result))
            }
            Err(message) => {
                eprintln!("{message}");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

fn report(err: &ClientError) {
    match err {
        ClientError::Rpc { code, message, .. } => {
            eprintln!("Request failed (code {code}): {message}");
        }
        ClientError::ConnectionClosed | ClientError::Protocol(_) => {
            eprintln!("Connection to the server was lost: {err}");
        }
        other => eprintln!("{other}"),
    }
}

/// Entry point for the excel-mcp client.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match config::load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(get_log_level(args.verbose, args.quiet, &cfg.logging.level));

    let Some(workbook) = args.workbook.or_else(|| cfg.workbook.clone()) else {
        eprintln!("No workbook given. Pass --workbook <PATH> or set EXCEL_MCP_WORKBOOK.");
        return ExitCode::FAILURE;
    };

    let mut options = HostOptions::new(resolve_server(args.server, &cfg), workbook);
    options.shutdown_timeout = cfg.client.shutdown_timeout();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let mut host = match ProcessHost::spawn(&options).await {
            Ok(host) => host,
            Err(e) => {
                report(&e);
                return ExitCode::FAILURE;
            }
        };

        let code = match run(&mut host, args.command).await {
            Ok(code) => code,
            Err(e) => {
                report(&e);
                ExitCode::FAILURE
            }
        };

        if let Err(e) = host.dispose().await {
            error!(error = %e, "Failed to stop server");
        }
        code
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn search_arguments_omit_missing_options() {
        let (tool, arguments) = command_call(Command::Search {
            query: "bolt".to_string(),
            worksheet: Some("Parts".to_string()),
            table: None,
            limit: Some(5),
            case_sensitive: false,
            cursor: None,
        })
        .unwrap();
        assert_eq!(tool, "excel-search");
        assert_eq!(arguments, json!({ "query": "bolt", "worksheet": "Parts", "limit": 5 }));
    }

    #[test]
    fn call_requires_json_object() {
        let err = command_call(Command::Call {
            tool: "excel-search".to_string(),
            arguments: "[1, 2]".to_string(),
        })
        .unwrap_err();
        assert!(err.contains("JSON object"));
    }
}
