//! The build orchestrator behind the `mellow` binary.
//!
//! The pipeline: discover and parse manifests ([`normalizer`]), translate the
//! normalized rules into tasks with declared inputs and outputs
//! ([`builder`]), then execute the sealed task graph ([`engine`]) with
//! hash-based up-to-date checks ([`hash_checker`]) and live progress.

pub mod build_config;
pub mod builder;
pub mod cli;
pub mod commands;
pub mod diff;
pub mod engine;
pub mod fs_util;
pub mod hash_checker;
pub mod normalizer;
pub mod repo;
pub mod rules;
pub mod runnable;
pub mod tracing_setup;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] mellow_manifest::ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Normalize(#[from] normalizer::Error),
    #[error(transparent)]
    Graph(#[from] engine::GraphError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] builder::Error),
    #[error(transparent)]
    Config(#[from] build_config::Error),
    #[error("{path}: {source}")]
    Io {
        path: camino::Utf8PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Execute(#[from] engine::ExecuteError),
    #[error("{failed} failed, {skipped} did not run")]
    TasksFailed { failed: usize, skipped: usize },
    #[error("{0} is not formatted")]
    NotFormatted(String),
    #[error("failed to start the runtime: {0}")]
    Runtime(std::io::Error),
    #[error("{0}")]
    InvalidArgs(String),
    #[error("{0}")]
    External(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<camino::Utf8PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
