pub mod channel_registry;
pub mod conflict;
pub mod context;
pub mod file_transfer;
pub mod git;
pub mod handlers;
pub mod protocol;
pub mod ssh;
pub mod ws;

pub use channel_registry::{ChannelRegistry, SharedChannelRegistry};
pub use conflict::{ConflictPhase, ConflictTracker, ResolveAction};
pub use context::{AppError, AppState, HandlerContext};
pub use git::{GitCli, GitError, SystemGit, MAX_DIFF_SIZE};
pub use protocol::{ClientMessage, ServerMessage, SessionDescriptor, PROTOCOL_VERSION};
pub use ssh::{BridgeError, RemoteConnector, SshConnector};
pub use ws::{router, run_server, serve};
