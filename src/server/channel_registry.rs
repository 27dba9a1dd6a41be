//! Per-connection remote resources
//!
//! Maps a connection id to its shell handle, file-transfer handle, listing cache
//! and output forwarder. The lock guards map operations only; connecting, writing
//! and closing happen on handles cloned out of the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::file_transfer::ListingCache;
use crate::server::protocol::ServerMessage;
use crate::server::ssh::{
    BridgeError, PtyRequest, RemoteConnector, RemoteFs, RemoteShell, ShellEvent, SshTarget,
};

/// Buffered shell chunks between the SSH pump and the forwarder
const OUTPUT_BUFFER: usize = 256;

/// How long teardown waits for the forwarder to drain
const FORWARDER_DRAIN: Duration = Duration::from_secs(2);

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Live resources of one connection
pub struct ChannelBinding {
    pub host: String,
    pub shell: Arc<dyn RemoteShell>,
    pub files: Arc<dyn RemoteFs>,
    pub cache: Arc<ListingCache>,
    /// Distinguishes a binding from the one that replaced it
    generation: u64,
    forwarder: JoinHandle<()>,
}

impl ChannelBinding {
    /// End the shell, close the SSH connection and drain the forwarder
    async fn close(self) {
        self.shell.shutdown().await;
        let mut forwarder = self.forwarder;
        if tokio::time::timeout(FORWARDER_DRAIN, &mut forwarder)
            .await
            .is_err()
        {
            forwarder.abort();
        }
    }
}

/// File-transfer view of a binding
#[derive(Clone)]
pub struct FileHandle {
    pub files: Arc<dyn RemoteFs>,
    pub cache: Arc<ListingCache>,
}

/// Connection id -> binding. At most one binding per connection.
#[derive(Default)]
pub struct ChannelRegistry {
    bindings: HashMap<String, ChannelBinding>,
}

pub type SharedChannelRegistry = Arc<Mutex<ChannelRegistry>>;

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedChannelRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.bindings.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn shell(&self, connection_id: &str) -> Option<Arc<dyn RemoteShell>> {
        self.bindings.get(connection_id).map(|b| b.shell.clone())
    }

    pub fn file_handle(&self, connection_id: &str) -> Option<FileHandle> {
        self.bindings.get(connection_id).map(|b| FileHandle {
            files: b.files.clone(),
            cache: b.cache.clone(),
        })
    }

    fn insert(&mut self, connection_id: &str, binding: ChannelBinding) -> Option<ChannelBinding> {
        self.bindings.insert(connection_id.to_string(), binding)
    }

    fn remove(&mut self, connection_id: &str) -> Option<ChannelBinding> {
        self.bindings.remove(connection_id)
    }
}

/// Relay shell events to the connection's outbound queue. When the remote
/// shell ends on its own the binding it belongs to is released.
fn spawn_forwarder(
    registry: SharedChannelRegistry,
    connection_id: String,
    generation: u64,
    mut events: mpsc::Receiver<ShellEvent>,
    outbound: mpsc::Sender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let (msg, closed) = match event {
                ShellEvent::Output(data) => (ServerMessage::Output { data }, false),
                ShellEvent::Closed => (ServerMessage::ShellClosed, true),
            };
            if outbound.send(msg).await.is_err() {
                debug!(connection = %connection_id, "Outbound queue closed, stopping forwarder");
                break;
            }
            if closed {
                release_exited(&registry, &connection_id, generation).await;
                break;
            }
        }
    })
}

/// Drop the binding of a shell that exited remotely, unless it was already
/// replaced or torn down
async fn release_exited(registry: &SharedChannelRegistry, connection_id: &str, generation: u64) {
    let binding = {
        let mut guard = registry.lock().await;
        let current = guard.bindings.get(connection_id).map(|b| b.generation);
        if current == Some(generation) {
            guard.remove(connection_id)
        } else {
            None
        }
    };
    // Not `close()`: that would wait on this very task
    if let Some(binding) = binding {
        binding.shell.shutdown().await;
        info!(connection = %connection_id, host = %binding.host, "Remote shell exited, session released");
    }
}

/// Open a shell and file-transfer handle for `connection_id`, replacing any
/// existing binding. The previous binding is fully closed before connecting.
///
/// Returns the remote working directory.
pub async fn start_session(
    registry: &SharedChannelRegistry,
    connector: &dyn RemoteConnector,
    connection_id: &str,
    target: &SshTarget,
    pty: &PtyRequest,
    outbound: mpsc::Sender<ServerMessage>,
) -> Result<String, BridgeError> {
    if teardown(registry, connection_id).await {
        info!(connection = %connection_id, "Replaced existing remote session");
    }

    let (events_tx, events_rx) = mpsc::channel(OUTPUT_BUFFER);
    let session = connector.connect(target, pty, events_tx).await?;

    let pwd = match session.files.canonicalize(".").await {
        Ok(pwd) => pwd,
        Err(e) => {
            session.shell.shutdown().await;
            return Err(e);
        }
    };

    // The forwarder is spawned under the lock so an early exit cannot release
    // before the binding is in the map
    let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
    let previous = {
        let mut guard = registry.lock().await;
        let forwarder = spawn_forwarder(
            registry.clone(),
            connection_id.to_string(),
            generation,
            events_rx,
            outbound,
        );
        guard.insert(
            connection_id,
            ChannelBinding {
                host: target.host.clone(),
                shell: session.shell,
                files: session.files,
                cache: Arc::new(ListingCache::new()),
                generation,
                forwarder,
            },
        )
    };
    if let Some(previous) = previous {
        warn!(connection = %connection_id, "Binding raced with start, closing the older one");
        previous.close().await;
    }

    info!(connection = %connection_id, ssh = ?target, pwd = %pwd, "Remote session bound");
    Ok(pwd)
}

/// Write input to the bound shell; ignored when nothing is bound
pub async fn send_input(registry: &SharedChannelRegistry, connection_id: &str, data: &[u8]) {
    let shell = registry.lock().await.shell(connection_id);
    let Some(shell) = shell else {
        debug!(connection = %connection_id, "Input without a bound shell, ignored");
        return;
    };
    if let Err(e) = shell.write(data).await {
        warn!(connection = %connection_id, "Shell input failed: {}", e);
    }
}

/// Window change for the bound shell; ignored when nothing is bound
pub async fn resize(registry: &SharedChannelRegistry, connection_id: &str, cols: u32, rows: u32) {
    let shell = registry.lock().await.shell(connection_id);
    if let Some(shell) = shell {
        if let Err(e) = shell.resize(cols, rows).await {
            debug!(connection = %connection_id, "Resize failed: {}", e);
        }
    }
}

/// Remove and close the binding. Returns whether one existed; calling it again
/// is a no-op.
pub async fn teardown(registry: &SharedChannelRegistry, connection_id: &str) -> bool {
    let binding = registry.lock().await.remove(connection_id);
    match binding {
        Some(binding) => {
            let host = binding.host.clone();
            binding.close().await;
            info!(connection = %connection_id, host = %host, "Remote session closed");
            true
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory connector used by registry, file and handler tests

    use super::*;
    use crate::server::ssh::{RemoteEntry, RemoteSession};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Ordered log of open/close calls shared by every fake session
    pub type EventLog = Arc<StdMutex<Vec<String>>>;

    pub struct FakeShell {
        id: usize,
        log: EventLog,
        pub written: StdMutex<Vec<u8>>,
        output: StdMutex<Option<mpsc::Sender<ShellEvent>>>,
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        async fn write(&self, data: &[u8]) -> Result<(), BridgeError> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn resize(&self, cols: u32, rows: u32) -> Result<(), BridgeError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("resize:{}:{}x{}", self.id, cols, rows));
            Ok(())
        }

        async fn shutdown(&self) {
            // Dropping the sender ends the forwarder, like the real pump
            if self.output.lock().unwrap().take().is_some() {
                self.log.lock().unwrap().push(format!("close:{}", self.id));
            }
        }
    }

    /// Directory tree keyed by path; files hold their bytes
    #[derive(Default)]
    pub struct FakeFs {
        pub dirs: StdMutex<HashMap<String, Vec<RemoteEntry>>>,
        pub files: StdMutex<HashMap<String, Vec<u8>>>,
        pub list_calls: StdMutex<Vec<String>>,
        pub renames: StdMutex<Vec<(String, String)>>,
        pub cwd: String,
    }

    impl FakeFs {
        pub fn with_cwd(cwd: &str) -> Self {
            Self {
                cwd: cwd.to_string(),
                ..Default::default()
            }
        }

        pub fn add_file(&self, dir: &str, name: &str, data: &[u8]) {
            let path = crate::server::ssh::join_remote(dir, name);
            self.dirs
                .lock()
                .unwrap()
                .entry(dir.to_string())
                .or_default()
                .push(RemoteEntry {
                    name: name.to_string(),
                    path: path.clone(),
                    is_dir: false,
                    size: data.len() as u64,
                });
            self.files.lock().unwrap().insert(path, data.to_vec());
        }

        pub fn add_dir(&self, parent: &str, name: &str) {
            let path = crate::server::ssh::join_remote(parent, name);
            let mut dirs = self.dirs.lock().unwrap();
            dirs.entry(parent.to_string()).or_default().push(RemoteEntry {
                name: name.to_string(),
                path: path.clone(),
                is_dir: true,
                size: 0,
            });
            dirs.entry(path).or_default();
        }

        pub fn list_count(&self, path: &str) -> usize {
            self.list_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.as_str() == path)
                .count()
        }
    }

    #[async_trait]
    impl RemoteFs for FakeFs {
        async fn canonicalize(&self, _path: &str) -> Result<String, BridgeError> {
            Ok(self.cwd.clone())
        }

        async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, BridgeError> {
            self.list_calls.lock().unwrap().push(path.to_string());
            self.dirs
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| BridgeError::NotFound(path.to_string()))
        }

        async fn is_dir(&self, path: &str) -> Result<bool, BridgeError> {
            if self.dirs.lock().unwrap().contains_key(path) {
                return Ok(true);
            }
            if self.files.lock().unwrap().contains_key(path) {
                return Ok(false);
            }
            Err(BridgeError::NotFound(path.to_string()))
        }

        async fn read_file(&self, path: &str) -> Result<Vec<u8>, BridgeError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| BridgeError::NotFound(path.to_string()))
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), BridgeError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn rename(&self, src: &str, dest: &str) -> Result<(), BridgeError> {
            self.renames
                .lock()
                .unwrap()
                .push((src.to_string(), dest.to_string()));
            Ok(())
        }
    }

    /// Hands out numbered fake sessions; keeps the output sender of each so
    /// tests can emit shell output
    pub struct FakeConnector {
        pub log: EventLog,
        pub fs: Arc<FakeFs>,
        pub shells: StdMutex<Vec<Arc<FakeShell>>>,
        pub fail_with: StdMutex<Option<String>>,
    }

    impl FakeConnector {
        pub fn new(fs: FakeFs) -> Self {
            Self {
                log: Arc::new(StdMutex::new(Vec::new())),
                fs: Arc::new(fs),
                shells: StdMutex::new(Vec::new()),
                fail_with: StdMutex::new(None),
            }
        }

        pub fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn shell(&self, index: usize) -> Arc<FakeShell> {
            self.shells.lock().unwrap()[index].clone()
        }

        pub async fn emit(&self, index: usize, event: ShellEvent) {
            let tx = self.shell(index).output.lock().unwrap().clone();
            if let Some(tx) = tx {
                tx.send(event).await.unwrap();
            }
        }
    }

    #[async_trait]
    impl RemoteConnector for FakeConnector {
        async fn connect(
            &self,
            target: &SshTarget,
            _pty: &PtyRequest,
            output: mpsc::Sender<ShellEvent>,
        ) -> Result<RemoteSession, BridgeError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(BridgeError::Connect {
                    host: target.host.clone(),
                    reason,
                });
            }
            let mut shells = self.shells.lock().unwrap();
            let id = shells.len();
            self.log.lock().unwrap().push(format!("open:{}", id));
            let shell = Arc::new(FakeShell {
                id,
                log: self.log.clone(),
                written: StdMutex::new(Vec::new()),
                output: StdMutex::new(Some(output)),
            });
            shells.push(shell.clone());
            Ok(RemoteSession {
                shell,
                files: self.fs.clone(),
            })
        }
    }

    pub fn target() -> SshTarget {
        SshTarget {
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "ec2-user".to_string(),
            credential: crate::server::ssh::Credential::Password("pw".to_string()),
        }
    }

    pub fn pty() -> PtyRequest {
        PtyRequest {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}
