//! Supervised execution of external commands.
//!
//! Build steps run compilers, code generators, and tests as child processes.
//! Each child gets its stdout and stderr redirected to capture files, runs in
//! its own process group, and is killed (group-wide) when its deadline
//! passes. Failures carry the command line and the tails of both capture
//! files so the task error is actionable without hunting for files.

mod child;
mod command;

pub use child::{Child, ChildExit, Error};
pub use command::Command;
