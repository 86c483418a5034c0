//! Host configuration.
//!
//! Resolution order for the YAML file:
//! 1. `--config <path>` (must exist)
//! 2. `FACADE_RELAY_CONFIG` (must exist)
//! 3. `./facade-relay.yaml` (optional)
//!
//! String values may use `${VAR}` or `${VAR:-default}`; a leading `~` in a
//! default expands to the home directory. Every field has a default, so no
//! file at all is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_core::{ConversationPolicy, DEFAULT_HISTORY_REQUESTS, DEFAULT_MAX_STEPS};
use crate::inference::ModelConfig;
use crate::mcp_client::client::DEFAULT_CALL_TIMEOUT_MS;
use crate::mcp_client::{McpServersConfig, ServerConfig, ToolCatalog};

// ─── Constants ──────────────────────────────────────────────────────────────

pub const CONFIG_ENV: &str = "FACADE_RELAY_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "facade-relay.yaml";
pub const ENV_FILE: &str = ".env";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that can answer questions and help with tasks. \
Based on the user's request, you will decide which MCP server to route the request to, \
and the best way to route the request to that server. \
Tools are named `<server>.<tool>`.";

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ─── HostConfig ─────────────────────────────────────────────────────────────

/// Everything the routing host needs at startup. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Non-final decisions allowed per request.
    pub max_steps: u32,
    pub call_timeout_ms: u64,
    pub conversation: ConversationPolicy,
    /// Most recent requests sent to the oracle under `persist`.
    pub history_requests: usize,
    pub system_prompt: String,
    pub model: ModelConfig,
    /// Server id → launch spec. `None` means the three built-in facades.
    #[serde(rename = "mcpServers", alias = "servers", skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<BTreeMap<String, ServerConfig>>,
    /// JSON server map that replaces `mcpServers` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers_file: Option<PathBuf>,
    /// Working directory for servers without their own `cwd`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            conversation: ConversationPolicy::default(),
            history_requests: DEFAULT_HISTORY_REQUESTS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: ModelConfig::default(),
            mcp_servers: None,
            servers_file: None,
            working_dir: None,
        }
    }
}

impl HostConfig {
    /// Resolve and load the config file, or defaults when there is none.
    ///
    /// Returns the path that was loaded, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.trim().is_empty() => Some(PathBuf::from(expand_tilde(p.trim()))),
                _ => {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }
            },
        };

        match path {
            Some(path) => {
                let config = Self::from_file(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Load one YAML file with env var interpolation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        if interpolated.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                path: "<inline>".into(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_steps must be at least 1".into(),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "call_timeout_ms must be positive".into(),
            });
        }
        if self.history_requests == 0 {
            return Err(ConfigError::Invalid {
                reason: "history_requests must be at least 1".into(),
            });
        }
        if let Some(servers) = &self.mcp_servers {
            check_server_ids(servers)?;
        }
        Ok(())
    }

    /// The session bootstrap map: `servers_file`, then `mcpServers`, then
    /// the built-in facades.
    pub fn servers_config(&self) -> Result<McpServersConfig, ConfigError> {
        if let Some(path) = &self.servers_file {
            let config =
                McpServersConfig::from_json_file(path).map_err(|e| ConfigError::Invalid {
                    reason: e.to_string(),
                })?;
            check_server_ids(&config.servers)?;
            return Ok(config);
        }
        if let Some(servers) = &self.mcp_servers {
            check_server_ids(servers)?;
            return Ok(McpServersConfig {
                servers: servers.clone(),
            });
        }
        let exe = std::env::current_exe().map_err(|e| ConfigError::Invalid {
            reason: format!("cannot locate own executable for built-in servers: {e}"),
        })?;
        Ok(default_servers(&exe.to_string_lossy()))
    }
}

/// Tool names are `server.tool`, so ids must be dot-free.
fn check_server_ids(servers: &BTreeMap<String, ServerConfig>) -> Result<(), ConfigError> {
    for name in servers.keys() {
        ToolCatalog::check_server_id(name).map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// `githubFacade`, `emailFacade` and `demoFacade`, each served by `program`.
pub fn default_servers(program: &str) -> McpServersConfig {
    let servers = [
        ("githubFacade", "github"),
        ("emailFacade", "email"),
        ("demoFacade", "demo"),
    ]
    .into_iter()
    .map(|(name, facade)| {
        (
            name.to_string(),
            ServerConfig {
                command: program.to_string(),
                args: vec!["serve".to_string(), facade.to_string()],
                env: BTreeMap::new(),
                cwd: None,
            },
        )
    })
    .collect();
    McpServersConfig { servers }
}

// ─── Env interpolation ──────────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}`. Unset without default → `""`.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── .env ───────────────────────────────────────────────────────────────────

/// Load `KEY=VALUE` lines into the process environment.
///
/// Variables already set win. Blank lines, `#` comments and an `export `
/// prefix are accepted; matching surrounding quotes are stripped. A missing
/// file loads nothing. Returns the number of variables set.
pub fn load_env_file(path: &Path) -> usize {
    let Ok(content) = std::fs::read_to_string(path) else {
        return 0;
    };

    let mut loaded = 0;
    for line in content.lines() {
        let Some((key, value)) = parse_env_line(line) else {
            continue;
        };
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        loaded += 1;
    }

    tracing::info!(path = %path.display(), loaded, "loaded env file");
    loaded
}

fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    let value = value.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value);
    Some((key, value))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.conversation, ConversationPolicy::Persist);
        assert!(config.system_prompt.starts_with("You are a helpful assistant"));
        assert_eq!(config.model.model_name, "gemini-2.0-flash-lite");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(HostConfig::from_yaml_str("\n").unwrap(), HostConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
max_steps: 4
conversation: reset
model:
  model_name: local-model
  base_url: http://localhost:8080/v1
  api_key_env: null
mcpServers:
  demoFacade:
    command: facade-relay
    args: [serve, demo]
"#;
        let config = HostConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_steps, 4);
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.conversation, ConversationPolicy::Reset);
        assert_eq!(config.model.api_key_env, None);
        assert_eq!(config.model.temperature, 0.7);

        let servers = config.servers_config().unwrap();
        assert_eq!(servers.servers.len(), 1);
        assert_eq!(servers.servers["demoFacade"].args, vec!["serve", "demo"]);
    }

    #[test]
    fn test_rejects_zero_steps() {
        let err = HostConfig::from_yaml_str("max_steps: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_dotted_server_id() {
        let yaml = "mcpServers:\n  demo.facade:\n    command: facade-relay\n    args: [serve, demo]\n";
        let err = HostConfig::from_yaml_str(yaml).unwrap_err();
        let ConfigError::Invalid { reason } = err else {
            panic!("expected invalid config");
        };
        assert!(reason.contains("demo.facade"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mcpServers": {{"mail.box": {{"command": "python"}}}}}}"#).unwrap();
        let config = HostConfig {
            servers_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            config.servers_config().unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn test_history_requests() {
        assert_eq!(HostConfig::default().history_requests, DEFAULT_HISTORY_REQUESTS);
        let config = HostConfig::from_yaml_str("history_requests: 3").unwrap();
        assert_eq!(config.history_requests, 3);
        assert!(HostConfig::from_yaml_str("history_requests: 0").is_err());
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_steps: [not a number").unwrap();
        let err = HostConfig::from_file(file.path()).unwrap_err();
        let ConfigError::Parse { path, .. } = err else {
            panic!("expected parse error");
        };
        assert_eq!(path, file.path().display().to_string());
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let err = HostConfig::load(Some(Path::new("/nonexistent/facade-relay.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_interpolation() {
        std::env::set_var("__FACADE_RELAY_TEST_MODEL__", "gemini-test");
        std::env::remove_var("__FACADE_RELAY_TEST_UNSET__");
        let yaml = "model:\n  model_name: ${__FACADE_RELAY_TEST_MODEL__}\n  base_url: ${__FACADE_RELAY_TEST_UNSET__:-http://localhost:1234/v1}\n";
        let config = HostConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model.model_name, "gemini-test");
        assert_eq!(config.model.base_url, "http://localhost:1234/v1");
        std::env::remove_var("__FACADE_RELAY_TEST_MODEL__");

        assert_eq!(interpolate_env_vars("plain text"), "plain text");
        assert_eq!(interpolate_env_vars("a${__FACADE_RELAY_TEST_UNSET__}b"), "ab");
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/logs");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, format!("{}/logs", home.display()));
        }
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_servers_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{"emailFacade": {{"command": "python", "args": ["email_mcp.py"]}}}}}}"#
        )
        .unwrap();
        let config = HostConfig {
            servers_file: Some(file.path().to_path_buf()),
            mcp_servers: Some(BTreeMap::new()),
            ..Default::default()
        };
        let servers = config.servers_config().unwrap();
        assert_eq!(servers.servers["emailFacade"].command, "python");
    }

    #[test]
    fn test_default_servers_are_the_three_facades() {
        let servers = default_servers("/usr/bin/facade-relay").servers;
        assert_eq!(
            servers.keys().collect::<Vec<_>>(),
            vec!["demoFacade", "emailFacade", "githubFacade"]
        );
        assert_eq!(servers["githubFacade"].args, vec!["serve", "github"]);
        assert_eq!(servers["demoFacade"].command, "/usr/bin/facade-relay");
    }

    #[test]
    fn test_env_file_existing_vars_win() {
        std::env::set_var("__FACADE_RELAY_ENV_KEEP__", "original");
        std::env::remove_var("__FACADE_RELAY_ENV_NEW__");
        std::env::remove_var("__FACADE_RELAY_ENV_QUOTED__");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "__FACADE_RELAY_ENV_KEEP__=replaced").unwrap();
        writeln!(file, "export __FACADE_RELAY_ENV_NEW__=fresh").unwrap();
        writeln!(file, "__FACADE_RELAY_ENV_QUOTED__=\"with spaces\"").unwrap();
        writeln!(file, "not a pair").unwrap();

        assert_eq!(load_env_file(file.path()), 2);
        assert_eq!(std::env::var("__FACADE_RELAY_ENV_KEEP__").unwrap(), "original");
        assert_eq!(std::env::var("__FACADE_RELAY_ENV_NEW__").unwrap(), "fresh");
        assert_eq!(std::env::var("__FACADE_RELAY_ENV_QUOTED__").unwrap(), "with spaces");
    }

    #[test]
    fn test_missing_env_file_loads_nothing() {
        assert_eq!(load_env_file(Path::new("/nonexistent/.env")), 0);
    }
}
