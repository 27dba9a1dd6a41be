// Git module - subprocess orchestration for repository workflows
//
// This module is split into logical submodules:
// - runner: GitExecutor seam, the system git runner and GitCli
// - parse: Pure parsers for status, branches, log, stash and diff output
// - utils: Common types, constants, error handling, and helper functions
// - status: Status and history queries
// - operations: Per-file diffs and file contents at a ref
// - branches: Branch listing and local branch switch
// - commit: Commit, push and pull
// - stash: Stash push and listing

pub mod branches;
pub mod commit;
pub mod operations;
pub mod parse;
pub mod runner;
pub mod stash;
pub mod status;
pub mod utils;

#[cfg(test)]
pub(crate) mod stub;

pub use parse::{Branch, Commit, FileChange, ParsedDiff, StashEntry, Upstream};
pub use runner::{GitCli, GitExecutor, GitOutput, SystemGit};
pub use utils::*;
