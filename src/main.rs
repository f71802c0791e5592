//! excel-mcp: MCP server for Excel workbooks
//!
//! Serves one workbook over stdio. Protocol messages use stdout; all
//! diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use excel_mcp::config;
use excel_mcp::mcp::server::McpServer;
use excel_mcp::workbook::WorkbookService;

/// MCP server for Excel workbooks.
///
/// Exposes the worksheets and tables of an `.xlsx` workbook as MCP tools and
/// resources over stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "excel-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workbook to serve
    #[arg(short, long, value_name = "PATH", env = "EXCEL_MCP_WORKBOOK")]
    workbook: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
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

/// Entry point for the excel-mcp server.
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
    if !workbook.is_file() {
        eprintln!("Workbook not found at '{}'.", workbook.display());
        return ExitCode::FAILURE;
    }

    let service = WorkbookService::new(workbook)
        .with_limits(cfg.pagination.limits())
        .with_resource_preview_rows(cfg.pagination.resource_preview_rows);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workbook = %service.path().display(),
        "Starting excel-mcp server"
    );

    let mut server = McpServer::stdio(Arc::new(service));

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

    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
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
    fn log_level_resolution() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "DEBUG"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "loud"), Level::WARN);
        assert_eq!(get_log_level(1, false, "error"), Level::INFO);
        assert_eq!(get_log_level(5, false, "error"), Level::TRACE);
    }
}
