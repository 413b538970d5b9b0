//! What a task actually does when it is not cached.
//!
//! One variant per task shape: compile/link a C++ target, run a test binary
//! and compare its output, run a generator binary in a scratch dir, or probe
//! a system library's flags. Each holds everything it needs up front; the
//! engine just awaits [`Runnable::run`].

use std::collections::BTreeSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use mellow_paths::PackagePath;
use mellow_process::{Child, Command};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{diff, fs_util};

/// Compiles and links get the long leash; generators and tests the short one.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const RUN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RunnableError {
    #[error(transparent)]
    Process(#[from] mellow_process::Error),
    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("test failed:\n{0}")]
    TestDiff(String),
    #[error("expected output not generated: {0}")]
    MissingOutput(Utf8PathBuf),
    #[error("bad system lib config {path}: {message}")]
    BadSystemLibConfig { path: Utf8PathBuf, message: String },
}

impl RunnableError {
    fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        RunnableError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The flags a `system_lib` probe captured, persisted under the build dir
/// and folded into dependent compiles and links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemLibConfig {
    pub cpp_flags: Vec<String>,
    pub ld_libs: Vec<String>,
}

impl SystemLibConfig {
    pub fn load(path: &Utf8Path) -> Result<Self, RunnableError> {
        let text = std::fs::read_to_string(path).map_err(|e| RunnableError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| RunnableError::BadSystemLibConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn store(&self, path: &Utf8Path) -> Result<(), RunnableError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RunnableError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).expect("config serializes");
        std::fs::write(path, json).map_err(|e| RunnableError::io(path, e))
    }
}

#[derive(Debug)]
pub enum Runnable {
    CppCompileLink(CppCompileLink),
    TestRun(TestRun),
    GenRuleExec(GenRuleExec),
    SystemLibProbe(SystemLibProbe),
}

impl Runnable {
    pub fn is_test(&self) -> bool {
        matches!(self, Runnable::TestRun(_))
    }

    pub async fn run(&self) -> Result<(), RunnableError> {
        match self {
            Runnable::CppCompileLink(r) => r.run().await,
            Runnable::TestRun(r) => r.run().await,
            Runnable::GenRuleExec(r) => r.run().await,
            Runnable::SystemLibProbe(r) => r.run().await,
        }
    }
}

/// One compile (libraries, with `-c`) or compile+link (binaries, tests).
#[derive(Debug)]
pub struct CppCompileLink {
    pub name: PackagePath,
    /// Absent for header-only libraries, which makes the task a no-op.
    pub main_output: Option<Utf8PathBuf>,
    pub compiler: Utf8PathBuf,
    /// Fully assembled flag prefix, ordering fixed by the task builder.
    pub cpp_flags: Vec<String>,
    pub is_library: bool,
    pub input_sources: BTreeSet<Utf8PathBuf>,
    pub input_objects: BTreeSet<Utf8PathBuf>,
    pub system_lib_configs: BTreeSet<Utf8PathBuf>,
}

impl CppCompileLink {
    /// The fingerprint of everything that is not a file: a flag or compiler
    /// change must invalidate the task even when no input changed.
    pub fn non_file_inputs_key(&self) -> String {
        let mut parts: Vec<&str> = self.cpp_flags.iter().map(String::as_str).collect();
        parts.push(self.compiler.as_str());
        parts.join("##")
    }

    async fn run(&self) -> Result<(), RunnableError> {
        let Some(main_output) = &self.main_output else {
            return Ok(());
        };
        if let Some(parent) = main_output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RunnableError::io(parent, e))?;
        }

        let mut args: Vec<String> = self.cpp_flags.clone();
        args.extend(self.input_sources.iter().map(|p| p.to_string()));
        args.extend(self.input_objects.iter().map(|p| p.to_string()));
        args.push("-o".to_owned());
        args.push(main_output.to_string());

        for config_path in &self.system_lib_configs {
            let config = SystemLibConfig::load(config_path)?;
            if self.is_library {
                args.extend(config.cpp_flags);
            } else {
                args.extend(config.ld_libs);
                args.extend(config.cpp_flags);
            }
        }

        debug!("compiling {}", self.name);
        let command =
            Command::new(self.compiler.clone(), main_output, COMPILE_TIMEOUT).args(args);
        Child::new(command).run().await?;
        Ok(())
    }
}

/// Runs a test binary and compares its stdout against the expected file.
#[derive(Debug)]
pub struct TestRun {
    pub name: PackagePath,
    pub root_build_dir: Utf8PathBuf,
    pub test_binary: Utf8PathBuf,
    /// The `<output>` file beside the manifest.
    pub expected: Utf8PathBuf,
    pub update_test_output: bool,
}

impl TestRun {
    async fn run(&self) -> Result<(), RunnableError> {
        let output_prefix = self.name.to_filesystem(&self.root_build_dir);
        let command = Command::new(self.test_binary.clone(), &output_prefix, RUN_TIMEOUT);
        let stdout_path = command.stdout_path().to_path_buf();
        Child::new(command).run().await?;

        if self.update_test_output {
            return fs_util::copy_if_differs(&stdout_path, &self.expected)
                .map_err(|e| RunnableError::io(&self.expected, e));
        }

        let changes = diff::diff_files(&self.expected, &stdout_path)
            .map_err(|e| RunnableError::io(&self.expected, e))?;
        if changes.is_empty() {
            return Ok(());
        }
        let mut lines = Vec::with_capacity(changes.len());
        for change in changes {
            lines.push(format!(
                "{}:{}: {} {}",
                self.expected,
                change.line_number,
                change.action.prefix(),
                change.line
            ));
        }
        Err(RunnableError::TestDiff(lines.join("\n")))
    }
}

/// Runs a previously built binary in a per-package scratch dir and copies
/// the declared outputs back beside the manifest when they changed.
#[derive(Debug)]
pub struct GenRuleExec {
    pub binary: Utf8PathBuf,
    pub flags: Vec<String>,
    pub root_build_dir: Utf8PathBuf,
    pub package_name: PackagePath,
    /// Absolute targets symlinked into the scratch dir before the run.
    pub data: BTreeSet<Utf8PathBuf>,
    /// (path produced in the scratch dir, destination beside the manifest)
    pub outputs: Vec<(Utf8PathBuf, Utf8PathBuf)>,
}

impl GenRuleExec {
    async fn run(&self) -> Result<(), RunnableError> {
        let run_dir = self.package_name.to_filesystem(&self.root_build_dir);

        // Stale outputs must not satisfy the existence check below.
        for (run_dir_path, _) in &self.outputs {
            match std::fs::remove_file(run_dir_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(RunnableError::io(run_dir_path, err)),
            }
        }

        let command = Command::new(self.binary.clone(), &run_dir, RUN_TIMEOUT)
            .args(self.flags.clone())
            .current_dir(run_dir)
            .data(self.data.iter().cloned());
        Child::new(command).run().await?;

        for (run_dir_path, _) in &self.outputs {
            if !run_dir_path.is_file() {
                return Err(RunnableError::MissingOutput(run_dir_path.clone()));
            }
        }
        for (run_dir_path, src_path) in &self.outputs {
            fs_util::copy_if_differs(run_dir_path, src_path)
                .map_err(|e| RunnableError::io(src_path, e))?;
        }
        Ok(())
    }
}

/// Asks a pkg-config style tool for a library's link and compile flags and
/// persists the pair for dependent compiles.
#[derive(Debug)]
pub struct SystemLibProbe {
    pub command: Utf8PathBuf,
    pub flags: Vec<String>,
    /// The `<name>.output` file under the build dir.
    pub output_path: Utf8PathBuf,
}

impl SystemLibProbe {
    async fn run(&self) -> Result<(), RunnableError> {
        let ld_libs = self.query("libs", "--libs").await?;
        let cpp_flags = self.query("cflags", "--cflags").await?;
        let config = SystemLibConfig { cpp_flags, ld_libs };
        config.store(&self.output_path)
    }

    async fn query(&self, suffix: &str, arg: &str) -> Result<Vec<String>, RunnableError> {
        let prefix = Utf8PathBuf::from(format!("{}.{suffix}", self.output_path));
        let mut args = self.flags.clone();
        args.push(arg.to_owned());
        let command = Command::new(self.command.clone(), &prefix, RUN_TIMEOUT).args(args);
        let stdout_path = command.stdout_path().to_path_buf();
        Child::new(command).run().await?;
        let captured = std::fs::read_to_string(&stdout_path)
            .map_err(|e| RunnableError::io(&stdout_path, e))?;
        Ok(captured.split_whitespace().map(str::to_owned).collect())
    }
}
