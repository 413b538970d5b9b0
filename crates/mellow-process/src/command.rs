use std::{collections::BTreeSet, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};

/// A builder describing one supervised child process.
///
/// `stdout`/`stderr` name the capture files the child's streams are
/// redirected into. `data` entries are symlinked into `cwd` under their
/// basenames before the child starts.
#[derive(Debug, Clone)]
pub struct Command {
    program: Utf8PathBuf,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    data: BTreeSet<Utf8PathBuf>,
    stdout_path: Utf8PathBuf,
    stderr_path: Utf8PathBuf,
    timeout: Duration,
}

impl Command {
    /// A command whose capture files are `<output_prefix>.stdout` and
    /// `<output_prefix>.stderr`.
    pub fn new(program: impl Into<Utf8PathBuf>, output_prefix: &Utf8Path, timeout: Duration) -> Self {
        let mut stdout_path = output_prefix.to_path_buf().into_string();
        let mut stderr_path = stdout_path.clone();
        stdout_path.push_str(".stdout");
        stderr_path.push_str(".stderr");
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            data: BTreeSet::new(),
            stdout_path: stdout_path.into(),
            stderr_path: stderr_path.into(),
            timeout,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Files to materialize as symlinks under `cwd` before launch.
    pub fn data<I, P>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.data.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    pub fn data_targets(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.data
    }

    pub fn stdout_path(&self) -> &Utf8Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Utf8Path {
        &self.stderr_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `cmd arg arg` rendering used in error messages and logs.
    pub fn label(&self) -> String {
        let mut label = self.program.to_string();
        for arg in &self.args {
            label.push(' ');
            label.push_str(arg);
        }
        label
    }
}
