//! Remote shell bridge
//!
//! The registry and file handlers only see the traits below; `client` holds the
//! russh implementation. Tests substitute in-memory fakes.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::server::protocol::SessionDescriptor;

pub use client::SshConnector;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Invalid(String),
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },
    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },
    #[error("Handshake with {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },
    #[error("Shell channel error: {0}")]
    Channel(String),
    #[error("SFTP error: {0}")]
    Sftp(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// How the client authenticates
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Key {
        pem: String,
        passphrase: Option<String>,
    },
}

/// Resolved connection target
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

impl SshTarget {
    pub fn from_descriptor(
        descriptor: &SessionDescriptor,
        platform_users: &HashMap<String, String>,
    ) -> Result<Self, BridgeError> {
        descriptor.validate().map_err(BridgeError::Invalid)?;

        let password = descriptor.password.clone().filter(|p| !p.is_empty());
        let key = descriptor.private_key.clone().filter(|k| !k.trim().is_empty());
        let credential = match (password, key) {
            (Some(password), None) => Credential::Password(password),
            (None, Some(pem)) => Credential::Key {
                pem,
                passphrase: descriptor.passphrase.clone().filter(|p| !p.is_empty()),
            },
            _ => {
                return Err(BridgeError::Invalid(
                    "exactly one of password or private key is required".to_string(),
                ))
            }
        };

        Ok(Self {
            host: descriptor.host.trim().to_string(),
            port: descriptor.port,
            username: resolve_username(
                descriptor.username.as_deref(),
                &descriptor.platform,
                platform_users,
            ),
            credential,
        })
    }
}

/// Default login per platform tag
const PLATFORM_USERS: &[(&str, &str)] = &[
    ("aws", "ec2-user"),
    ("amazon-linux", "ec2-user"),
    ("ubuntu", "ubuntu"),
    ("aws-ubuntu", "ubuntu"),
    ("debian", "admin"),
    ("centos", "centos"),
    ("rhel", "ec2-user"),
    ("fedora", "fedora"),
    ("azure", "azureuser"),
    ("gcp", "ubuntu"),
    ("digitalocean", "root"),
];

/// Explicit username if non-empty, else the configured or built-in platform
/// default, else `root`
pub fn resolve_username(
    explicit: Option<&str>,
    platform: &str,
    overrides: &HashMap<String, String>,
) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let platform = platform.trim().to_ascii_lowercase();
    if let Some(user) = overrides.get(&platform) {
        return user.clone();
    }
    PLATFORM_USERS
        .iter()
        .find(|(tag, _)| *tag == platform)
        .map(|(_, user)| user.to_string())
        .unwrap_or_else(|| "root".to_string())
}

/// Terminal geometry requested for the PTY
#[derive(Debug, Clone)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Emitted by a running shell
#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    Output(Vec<u8>),
    Closed,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError>;
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), BridgeError>;
    /// End the shell and close the SSH connection. Safe to call more than once.
    async fn shutdown(&self);
}

#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn canonicalize(&self, path: &str) -> Result<String, BridgeError>;
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, BridgeError>;
    async fn is_dir(&self, path: &str) -> Result<bool, BridgeError>;
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, BridgeError>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), BridgeError>;
    async fn rename(&self, src: &str, dest: &str) -> Result<(), BridgeError>;
}

/// Shell and file-transfer handles opened over one SSH connection
pub struct RemoteSession {
    pub shell: Arc<dyn RemoteShell>,
    pub files: Arc<dyn RemoteFs>,
}

/// Opens remote sessions. Shell output is delivered through `output` until the
/// shell ends or is shut down.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        target: &SshTarget,
        pty: &PtyRequest,
        output: mpsc::Sender<ShellEvent>,
    ) -> Result<RemoteSession, BridgeError>;
}

/// Join a remote directory and a child name
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Drop trailing separators so `/srv/` and `/srv` name the same directory
pub fn normalize_remote(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parent directory of a remote path (`/` for top-level entries)
pub fn parent_remote(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        let none = HashMap::new();
        let cases = [
            ("aws", "ec2-user"),
            ("amazon-linux", "ec2-user"),
            ("ubuntu", "ubuntu"),
            ("aws-ubuntu", "ubuntu"),
            ("debian", "admin"),
            ("centos", "centos"),
            ("rhel", "ec2-user"),
            ("fedora", "fedora"),
            ("azure", "azureuser"),
            ("gcp", "ubuntu"),
            ("digitalocean", "root"),
            ("something-else", "root"),
            ("", "root"),
        ];
        for (platform, user) in cases {
            assert_eq!(resolve_username(None, platform, &none), user, "platform {}", platform);
        }
    }

    #[test]
    fn test_explicit_username_wins() {
        let none = HashMap::new();
        assert_eq!(resolve_username(Some("deploy"), "aws", &none), "deploy");
        assert_eq!(resolve_username(Some(""), "aws", &none), "ec2-user");
        assert_eq!(resolve_username(Some("  "), "AWS", &none), "ec2-user");
    }

    #[test]
    fn test_config_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("debian".to_string(), "debian".to_string());
        overrides.insert("hetzner".to_string(), "ops".to_string());
        assert_eq!(resolve_username(None, "debian", &overrides), "debian");
        assert_eq!(resolve_username(None, "hetzner", &overrides), "ops");
        assert_eq!(resolve_username(None, "centos", &overrides), "centos");
    }

    #[test]
    fn test_target_from_descriptor() {
        let descriptor = SessionDescriptor {
            host: " host.example ".to_string(),
            port: 2222,
            platform: "ubuntu".to_string(),
            username: None,
            password: None,
            private_key: Some("PEM".to_string()),
            passphrase: Some(String::new()),
        };
        let target = SshTarget::from_descriptor(&descriptor, &HashMap::new()).unwrap();
        assert_eq!(target.host, "host.example");
        assert_eq!(target.port, 2222);
        assert_eq!(target.username, "ubuntu");
        assert!(matches!(target.credential, Credential::Key { passphrase: None, .. }));
    }

    #[test]
    fn test_remote_paths() {
        assert_eq!(join_remote("/home/ec2-user", "a.txt"), "/home/ec2-user/a.txt");
        assert_eq!(join_remote("/", "etc"), "/etc");
        assert_eq!(parent_remote("/home/ec2-user/a.txt"), "/home/ec2-user");
        assert_eq!(parent_remote("/etc"), "/");
        assert_eq!(parent_remote("/srv/app/"), "/srv");
        assert_eq!(parent_remote("a.txt"), ".");
        assert_eq!(normalize_remote("/home/ubuntu/"), "/home/ubuntu");
        assert_eq!(normalize_remote("/home/ubuntu"), "/home/ubuntu");
        assert_eq!(normalize_remote("///"), "/");
        assert_eq!(normalize_remote("logs/"), "logs");
    }
}
