//! Backend of the OpsDeck control panel.
//!
//! Bridges browser clients to remote shells over SSH, browses and transfers
//! files over SFTP, and drives local git working trees, all behind one
//! authenticated WebSocket.

pub mod config;
pub mod server;
pub mod util;
