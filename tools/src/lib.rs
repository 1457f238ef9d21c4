//! Running external tools: a timeout-bounded command runner and the git
//! operations built on it.

pub mod git;
pub mod process;
pub mod runner;

pub use git::{GitClient, GitError, GitSettings, StatusEntry, parse_porcelain};
pub use runner::{
    CommandOutput, CommandResult, CommandRunner, DEFAULT_MAX_OUTPUT_BYTES, ProcessError,
};
