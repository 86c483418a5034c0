//! GitHub facade launcher.
//!
//! The GitHub tools come from the upstream `@modelcontextprotocol/server-github`
//! package. This process only checks the token and hands its stdio over to it.

use std::time::Instant;

use tokio::process::Command;

use super::errors::ToolError;

pub const SERVER_NAME: &str = "github_mcp";

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// The upstream server reads its token from this variable.
const UPSTREAM_TOKEN_ENV: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

const PACKAGE: &str = "@modelcontextprotocol/server-github";

/// What to execute. `Debug` hides the token.
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl std::fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchSpec")
            .field("program", &self.program)
            .field("package", &PACKAGE)
            .finish_non_exhaustive()
    }
}

/// Read `GITHUB_TOKEN`. Missing or empty is fatal for this facade.
pub fn github_token_from_env() -> Result<String, ToolError> {
    std::env::var(TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ToolError::MissingCredential {
            name: TOKEN_ENV.to_string(),
        })
}

pub fn launch_spec(token: &str) -> LaunchSpec {
    let program = if cfg!(windows) { "npx.cmd" } else { "npx" };
    LaunchSpec {
        program: program.to_string(),
        args: vec![
            "-y".to_string(),
            PACKAGE.to_string(),
            "--token".to_string(),
            token.to_string(),
        ],
        env: vec![(UPSTREAM_TOKEN_ENV.to_string(), token.to_string())],
    }
}

/// The upstream server with inherited stdio. It dies with this process.
fn command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);
    cmd
}

/// Run the upstream server with inherited stdio until it exits.
pub async fn run_from_env() -> Result<std::process::ExitStatus, ToolError> {
    let token = github_token_from_env()?;
    let spec = launch_spec(&token);

    tracing::info!(program = %spec.program, package = PACKAGE, "launching GitHub MCP server");
    let start = Instant::now();

    let mut child = command(&spec)
        .spawn()
        .map_err(|e| ToolError::Execution {
            tool: "github".into(),
            reason: format!("failed to start {}: {e}", spec.program),
        })?;
    let status = child.wait().await.map_err(|e| ToolError::Execution {
        tool: "github".into(),
        reason: format!("failed waiting on {}: {e}", spec.program),
    })?;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    if status.success() {
        tracing::info!(elapsed_ms, "GitHub MCP server exited");
    } else {
        tracing::error!(elapsed_ms, status = %status, "GitHub MCP server failed");
    }
    Ok(status)
}
