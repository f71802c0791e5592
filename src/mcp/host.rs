//! Runs an `excel-mcp` server as a child process.
//!
//! [`ProcessHost::spawn`] starts the server on a workbook, forwards its
//! stderr to the log line by line, and completes the `initialize`
//! handshake before handing out the client. [`ProcessHost::dispose`] asks
//! the server to shut down and waits a bounded time for it to exit before
//! killing it.
//!
//! On Unix the server leads its own process group, so a forced kill also
//! reaches anything the server started.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::mcp::client::McpClient;
use crate::mcp::error::ClientError;
use crate::mcp::transport::Transport;
use crate::mcp::types::InitializeResult;

/// Default bound on each step of an orderly shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Name of the server executable.
pub const SERVER_BINARY: &str = "excel-mcp";

/// How to launch the server.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Server executable.
    pub server: PathBuf,
    /// Workbook passed as `--workbook`.
    pub workbook: PathBuf,
    /// Bound on the shutdown request and on waiting for exit.
    pub shutdown_timeout: Duration,
    /// Extra arguments appended after the workbook.
    pub args: Vec<String>,
}

impl HostOptions {
    /// Options for `server` on `workbook` with default timeouts.
    #[must_use]
    pub fn new(server: impl Into<PathBuf>, workbook: impl Into<PathBuf>) -> Self {
        Self {
            server: server.into(),
            workbook: workbook.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            args: Vec::new(),
        }
    }
}

/// A client session with a spawned server process.
pub struct ProcessHost {
    client: McpClient<ChildStdout, ChildStdin>,
    child: Child,
    stderr_drain: JoinHandle<()>,
    server: InitializeResult,
    shutdown_timeout: Duration,
}

impl ProcessHost {
    /// Starts the server and performs the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Spawn` if the process cannot be started, or the
    /// handshake's error if the server does not answer `initialize`. The
    /// process is killed in the latter case.
    pub async fn spawn(options: &HostOptions) -> Result<Self, ClientError> {
        let program = options.server.display().to_string();
        let spawn_error = |source| ClientError::Spawn {
            program: program.clone(),
            source,
        };

        let mut command = Command::new(&options.server);
        command
            .arg("--workbook")
            .arg(&options.workbook)
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(spawn_error)?;

        let not_captured = |stream: &str| spawn_error(std::io::Error::other(format!("{stream} was not captured")));
        let stdin = child.stdin.take().ok_or_else(|| not_captured("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| not_captured("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_captured("stderr"))?;

        tracing::info!(server = %program, workbook = %options.workbook.display(), pid = ?child.id(), "Started MCP server");
        let stderr_drain = tokio::spawn(drain_stderr(stderr));

        let mut client = McpClient::new(Transport::new(stdout, stdin));
        let server = match handshake(&mut client).await {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "MCP server handshake failed");
                if let Err(kill_error) = kill_tree(&mut child).await {
                    tracing::warn!(error = %kill_error, "Failed to kill MCP server");
                }
                stderr_drain.abort();
                return Err(e);
            }
        };

        tracing::info!(
            name = %server.server_info.name,
            version = %server.server_info.version,
            protocol = %server.protocol_version,
            "MCP server ready"
        );

        Ok(Self {
            client,
            child,
            stderr_drain,
            server,
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    /// The session's client.
    pub fn client(&mut self) -> &mut McpClient<ChildStdout, ChildStdin> {
        &mut self.client
    }

    /// What the server reported during `initialize`.
    #[must_use]
    pub const fn server(&self) -> &InitializeResult {
        &self.server
    }

    /// Shuts the server down and waits for it to exit.
    ///
    /// Sends `shutdown` (bounded by the shutdown timeout, failures ignored),
    /// then `exit`, then closes the server's stdin. If the process has not
    /// exited within the shutdown timeout it is killed together with its
    /// process group.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Process` if the process cannot be waited on or
    /// killed.
    pub async fn dispose(mut self) -> Result<ExitStatus, ClientError> {
        let outcome = timeout(self.shutdown_timeout, self.client.shutdown())
            .await
            .map_err(|_| ClientError::Timeout("shutdown response"))
            .and_then(|result| result);
        if let Err(e) = outcome {
            tracing::debug!(error = %e, "Shutdown request failed");
        }
        if let Err(e) = self.client.notify("exit", None).await {
            tracing::debug!(error = %e, "Exit notification failed");
        }
        if let Err(e) = self.client.close().await {
            tracing::debug!(error = %e, "Closing server stdin failed");
        }

        let status = if let Ok(waited) = timeout(self.shutdown_timeout, self.child.wait()).await {
            waited.map_err(ClientError::Process)?
        } else {
            tracing::warn!(
                timeout = ?self.shutdown_timeout,
                "MCP server did not exit in time, killing it"
            );
            kill_tree(&mut self.child).await.map_err(ClientError::Process)?;
            self.child.wait().await.map_err(ClientError::Process)?
        };

        // The pipe closes with the process; give the drain a moment to log
        // the last lines.
        if timeout(Duration::from_millis(200), &mut self.stderr_drain).await.is_err() {
            self.stderr_drain.abort();
        }

        tracing::info!(%status, "MCP server exited");
        Ok(status)
    }
}

async fn handshake(client: &mut McpClient<ChildStdout, ChildStdin>) -> Result<InitializeResult, ClientError> {
    let server = client.initialize().await?;
    client.notify("notifications/initialized", None).await?;
    Ok(server)
}

/// Kills the server, and on Unix every process left in its group.
async fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    kill_process_group(child.id());
    child.kill().await
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(leader: Option<u32>) {
    let Some(Ok(pgid)) = leader.map(libc::pid_t::try_from) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers. The child was spawned with
    // process_group(0), so its pid names its group, and it has not been
    // reaped yet because `Child::id` still returned it.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let error = std::io::Error::last_os_error();
        tracing::debug!(%error, pgid, "Failed to kill MCP server process group");
    }
}

/// Forwards the server's stderr to the log until the pipe closes.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.trim().is_empty() {
                    tracing::info!(peer = SERVER_BINARY, "{line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading MCP server stderr");
                break;
            }
        }
    }
}

/// The server executable installed next to `current_exe`, if there is one.
#[must_use]
pub fn sibling_server_path(current_exe: &Path) -> Option<PathBuf> {
    let candidate = current_exe
        .parent()?
        .join(format!("{SERVER_BINARY}{}", std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_server_is_spawn_error() {
        let options = HostOptions::new("/nonexistent/excel-mcp-server", "book.xlsx");
        let Err(err) = ProcessHost::spawn(&options).await else {
            panic!("spawning a missing program must fail");
        };
        assert!(matches!(err, ClientError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/excel-mcp-server"));
    }

    #[test]
    fn sibling_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let client = dir.path().join("excel-mcp-client");
        assert_eq!(sibling_server_path(&client), None);

        let server = dir.path().join(format!("excel-mcp{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&server, b"").unwrap();
        assert_eq!(sibling_server_path(&client), Some(server));
    }

    #[test]
    fn default_options() {
        let options = HostOptions::new("excel-mcp", "book.xlsx");
        assert_eq!(options.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(options.args.is_empty());
    }
}
