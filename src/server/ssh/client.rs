//! russh-backed implementation of the remote shell bridge

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    join_remote, BridgeError, Credential, PtyRequest, RemoteConnector, RemoteEntry, RemoteFs,
    RemoteSession, RemoteShell, ShellEvent, SshTarget,
};
use crate::config::SshSection;

/// Time allowed for the pump task to close the channel on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Client-side callbacks for one connection
struct ClientHandler {
    host: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are not pinned: every key is accepted and logged.
    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting unverified SSH host key"
        );
        Ok(true)
    }
}

/// Opens SSH connections with russh
pub struct SshConnector {
    config: Arc<client::Config>,
    handshake_timeout: Duration,
}

impl SshConnector {
    pub fn new(section: &SshSection) -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            handshake_timeout: section.handshake_timeout(),
        }
    }

    async fn handshake(&self, target: &SshTarget) -> Result<Handle<ClientHandler>, BridgeError> {
        let handler = ClientHandler {
            host: target.host.clone(),
        };
        let mut handle = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| BridgeError::Connect {
            host: target.host.clone(),
            reason: e.to_string(),
        })?;

        let authenticated = match &target.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(target.username.as_str(), password.as_str())
                    .await
            }
            Credential::Key { pem, passphrase } => {
                let key = russh_keys::decode_secret_key(pem, passphrase.as_deref())
                    .map_err(|e| BridgeError::Invalid(format!("Invalid private key: {}", e)))?;
                handle
                    .authenticate_publickey(target.username.as_str(), Arc::new(key))
                    .await
            }
        }
        .map_err(|e| BridgeError::Connect {
            host: target.host.clone(),
            reason: e.to_string(),
        })?;

        if !authenticated {
            close_handle(&handle).await;
            return Err(BridgeError::Auth {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }
        Ok(handle)
    }

    async fn open(
        handle: Arc<Handle<ClientHandler>>,
        pty: &PtyRequest,
        output: mpsc::Sender<ShellEvent>,
    ) -> Result<RemoteSession, BridgeError> {
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::Channel(e.to_string()))?;
        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(|e| BridgeError::Channel(e.to_string()))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| BridgeError::Channel(e.to_string()))?;

        let mut sftp_channel = handle
            .channel_open_session()
            .await
            .map_err(sftp_err)?;
        sftp_channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(sftp_err)?;
        let sftp = SftpSession::new(sftp_channel.into_stream())
            .await
            .map_err(sftp_err)?;

        let (commands_tx, commands_rx) = mpsc::channel(256);
        let pump = tokio::spawn(pump(channel, commands_rx, output));

        Ok(RemoteSession {
            shell: Arc::new(SshShell {
                handle,
                commands: Mutex::new(Some(commands_tx)),
                pump: tokio::sync::Mutex::new(Some(pump)),
            }),
            files: Arc::new(SftpFs { sftp }),
        })
    }
}

async fn close_handle(handle: &Handle<ClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("SSH disconnect failed: {}", e);
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        pty: &PtyRequest,
        output: mpsc::Sender<ShellEvent>,
    ) -> Result<RemoteSession, BridgeError> {
        info!(ssh = ?target, "Opening SSH session");
        let handle = tokio::time::timeout(self.handshake_timeout, self.handshake(target))
            .await
            .map_err(|_| BridgeError::Timeout {
                host: target.host.clone(),
                secs: self.handshake_timeout.as_secs(),
            })??;
        let handle = Arc::new(handle);

        match Self::open(handle.clone(), pty, output).await {
            Ok(session) => Ok(session),
            Err(e) => {
                close_handle(&handle).await;
                Err(e)
            }
        }
    }
}

enum ShellCommand {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
}

/// Moves bytes between the shell channel and the connection until either side ends
async fn pump(
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<ShellCommand>,
    output: mpsc::Sender<ShellEvent>,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if output.send(ShellEvent::Output(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if output.send(ShellEvent::Output(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Close) | None => {
                    let _ = output.send(ShellEvent::Closed).await;
                    return;
                }
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!("Shell write failed: {}", e);
                    }
                }
                Some(ShellCommand::Resize { cols, rows }) => {
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        debug!("Window change failed: {}", e);
                    }
                }
                // Sender dropped: shutdown requested
                None => break,
            },
        }
    }
    let _ = channel.eof().await;
    let _ = channel.close().await;
}

struct SshShell {
    handle: Arc<Handle<ClientHandler>>,
    commands: Mutex<Option<mpsc::Sender<ShellCommand>>>,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SshShell {
    fn sender(&self) -> Option<mpsc::Sender<ShellCommand>> {
        self.commands.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn write(&self, data: &[u8]) -> Result<(), BridgeError> {
        let Some(tx) = self.sender() else {
            return Ok(());
        };
        tx.send(ShellCommand::Data(data.to_vec()))
            .await
            .map_err(|_| BridgeError::Channel("shell closed".to_string()))
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), BridgeError> {
        let Some(tx) = self.sender() else {
            return Ok(());
        };
        tx.send(ShellCommand::Resize { cols, rows })
            .await
            .map_err(|_| BridgeError::Channel("shell closed".to_string()))
    }

    async fn shutdown(&self) {
        if let Ok(mut guard) = self.commands.lock() {
            guard.take();
        }
        if let Some(mut pump) = self.pump.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut pump).await.is_err() {
                pump.abort();
            }
        }
        close_handle(&self.handle).await;
    }
}

/// File transfer over the SFTP subsystem
struct SftpFs {
    sftp: SftpSession,
}

fn sftp_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Sftp(e.to_string())
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn canonicalize(&self, path: &str) -> Result<String, BridgeError> {
        self.sftp.canonicalize(path).await.map_err(sftp_err)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, BridgeError> {
        let dir = self.sftp.read_dir(path).await.map_err(sftp_err)?;
        Ok(dir
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| {
                let name = entry.file_name();
                let metadata = entry.metadata();
                RemoteEntry {
                    path: join_remote(path, &name),
                    is_dir: metadata.is_dir(),
                    size: metadata.len(),
                    name,
                }
            })
            .collect())
    }

    async fn is_dir(&self, path: &str) -> Result<bool, BridgeError> {
        let metadata = self.sftp.metadata(path).await.map_err(sftp_err)?;
        Ok(metadata.is_dir())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, BridgeError> {
        let mut file = self.sftp.open(path).await.map_err(sftp_err)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(sftp_err)?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), BridgeError> {
        let mut file = self.sftp.create(path).await.map_err(sftp_err)?;
        file.write_all(data)
            .await
            .map_err(sftp_err)?;
        file.shutdown()
            .await
            .map_err(sftp_err)?;
        Ok(())
    }

    async fn rename(&self, src: &str, dest: &str) -> Result<(), BridgeError> {
        self.sftp.rename(src, dest).await.map_err(sftp_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn target(port: u16) -> SshTarget {
        SshTarget {
            host: "127.0.0.1".to_string(),
            port,
            username: "ubuntu".to_string(),
            credential: Credential::Password("secret".to_string()),
        }
    }

    fn pty() -> PtyRequest {
        PtyRequest {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn test_silent_server_hits_handshake_timeout() {
        // Accepts the TCP connection but never sends an SSH banner
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let section = SshSection {
            handshake_timeout_secs: 1,
            ..Default::default()
        };
        let connector = SshConnector::new(&section);
        let (tx, _rx) = mpsc::channel(8);
        let started = std::time::Instant::now();
        let result = connector.connect(&target(port), &pty(), tx).await;

        assert!(matches!(result, Err(BridgeError::Timeout { secs: 1, .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_port_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(&SshSection::default());
        let (tx, _rx) = mpsc::channel(8);
        let result = connector.connect(&target(port), &pty(), tx).await;
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
    }
}
