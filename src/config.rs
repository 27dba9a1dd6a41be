//! Server configuration parsing (`~/.opsdeck/config.toml`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub ssh: SshSection,
    /// Repository references the git handlers may address by name
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    47900
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthSection {
    /// Accepted bearer tokens
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Skip the bearer check entirely (local development only)
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    /// Executable name or path; resolved through PATH at startup
    #[serde(default = "default_git_binary")]
    pub binary: String,
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout(),
            log_limit: default_log_limit(),
        }
    }
}

impl GitSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_git_timeout() -> u64 {
    30
}

fn default_log_limit() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    /// Extra or overriding platform -> default username entries
    #[serde(default)]
    pub platform_users: HashMap<String, String>,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            platform_users: HashMap::new(),
        }
    }
}

impl SshSection {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

fn default_handshake_timeout() -> u64 {
    15
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

/// A repository reference: the working tree git events operate on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl ServerConfig {
    /// Default location: `~/.opsdeck/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".opsdeck").join("config.toml"))
    }

    /// Load config from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repos {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::Invalid("repository name is empty".to_string()));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate repository name '{}'",
                    repo.name
                )));
            }
        }
        if !self.auth.disabled && self.auth.tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("empty auth token".to_string()));
        }
        Ok(())
    }

    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 47900);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.git.binary, "git");
        assert_eq!(config.git.timeout(), Duration::from_secs(30));
        assert_eq!(config.ssh.cols, 80);
        assert_eq!(config.ssh.rows, 24);
        assert!(!config.auth.disabled);
        assert!(config.repos.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[server]
port = 9000

[auth]
tokens = ["secret"]

[log]
format = "json"

[git]
timeout_secs = 5

[ssh.platform_users]
hetzner = "root"

[[repos]]
name = "api"
path = "/srv/api"
remote_url = "git@example.com:team/api.git"
"#;
        let config = ServerConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.auth.tokens, vec!["secret".to_string()]);
        assert_eq!(config.log.format, "json");
        assert_eq!(config.git.timeout_secs, 5);
        assert_eq!(config.ssh.platform_users.get("hetzner").map(String::as_str), Some("root"));

        let repo = config.repo("api").unwrap();
        assert_eq!(repo.path, PathBuf::from("/srv/api"));
        assert_eq!(repo.remote, "origin");
        assert!(config.repo("web").is_none());
    }

    #[test]
    fn test_duplicate_repo_rejected() {
        let toml_str = r#"
[[repos]]
name = "api"
path = "/a"

[[repos]]
name = "api"
path = "/b"
"#;
        assert!(matches!(
            ServerConfig::from_toml(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 47900);
    }
}
