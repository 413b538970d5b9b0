use std::{io, process::Stdio, time::Duration};

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::Command;

/// Bytes of each capture file replayed into an error message.
const CAPTURE_TAIL_BYTES: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn '{label}': {source}")]
    Spawn { label: String, source: io::Error },
    #[error("failed to prepare run directory for '{label}': {source}")]
    Setup { label: String, source: io::Error },
    #[error("'{label}'{cwd} timed out after {timeout:?}")]
    Timeout {
        label: String,
        cwd: String,
        timeout: Duration,
    },
    #[error(
        "'{label}'{cwd} failed with {exit}\nstderr:\n{stderr_tail}\nstdout:\n{stdout_tail}"
    )]
    Failed {
        label: String,
        cwd: String,
        exit: ChildExit,
        stderr_tail: String,
        stdout_tail: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChildExit {
    Finished(i32),
    /// The child was killed by a signal, or its exit code was unavailable.
    KilledExternal,
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildExit::Finished(code) => write!(f, "exit code {code}"),
            ChildExit::KilledExternal => f.write_str("a signal"),
        }
    }
}

/// One supervised child process.
pub struct Child {
    command: Command,
}

impl Child {
    pub fn new(command: Command) -> Self {
        Self { command }
    }

    /// Runs the command to completion.
    ///
    /// Capture-file parents and the cwd are created, declared data files are
    /// symlinked under the cwd, and the child's wait is raced against the
    /// command's timeout. On timeout the whole process group is killed.
    /// A non-zero exit is an error carrying the capture tails.
    pub async fn run(self) -> Result<(), Error> {
        let command = &self.command;
        let label = command.label();

        self.prepare_dirs()
            .map_err(|source| Error::Setup {
                label: label.clone(),
                source,
            })?;

        let mut cmd = TokioCommand::new(command.program().as_str());
        cmd.args(command.arg_list())
            .stdin(Stdio::null())
            .stdout(open_capture(command.stdout_path()).map_err(|source| Error::Setup {
                label: label.clone(),
                source,
            })?)
            .stderr(open_capture(command.stderr_path()).map_err(|source| Error::Setup {
                label: label.clone(),
                source,
            })?);
        if let Some(cwd) = command.cwd() {
            cmd.current_dir(cwd);
        }

        // Give the child its own process group so a timeout kill takes its
        // descendants with it.
        #[cfg(unix)]
        {
            use nix::unistd::setsid;
            unsafe {
                cmd.pre_exec(|| {
                    setsid().map_err(io::Error::from)?;
                    Ok(())
                });
            }
        }

        debug!("spawning '{label}'");
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            label: label.clone(),
            source,
        })?;
        let pid = child.id();

        let status = match tokio::time::timeout(command.timeout(), child.wait()).await {
            Ok(wait_result) => wait_result.map_err(|source| Error::Spawn {
                label: label.clone(),
                source,
            })?,
            Err(_elapsed) => {
                kill_group(pid);
                // Reap so the pid is not left behind.
                child.kill().await.ok();
                return Err(Error::Timeout {
                    label,
                    cwd: self.cwd_label(),
                    timeout: command.timeout(),
                });
            }
        };

        let exit = match status.code() {
            Some(0) => {
                debug!("'{label}' finished");
                return Ok(());
            }
            Some(code) => ChildExit::Finished(code),
            None => ChildExit::KilledExternal,
        };

        Err(Error::Failed {
            label,
            cwd: self.cwd_label(),
            exit,
            stderr_tail: read_tail(command.stderr_path()),
            stdout_tail: read_tail(command.stdout_path()),
        })
    }

    fn prepare_dirs(&self) -> io::Result<()> {
        let command = &self.command;
        for capture in [command.stdout_path(), command.stderr_path()] {
            if let Some(parent) = capture.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let Some(cwd) = command.cwd() else {
            return Ok(());
        };
        std::fs::create_dir_all(cwd)?;
        for target in command.data_targets() {
            let Some(file_name) = target.file_name() else {
                continue;
            };
            let link = cwd.join(file_name);
            match std::fs::symlink_metadata(&link) {
                Ok(_) => std::fs::remove_file(&link)?,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &link)?;
            #[cfg(not(unix))]
            std::fs::copy(target, &link).map(|_| ())?;
        }
        Ok(())
    }

    fn cwd_label(&self) -> String {
        match self.command.cwd() {
            Some(cwd) => format!(" (cwd {cwd})"),
            None => String::new(),
        }
    }
}

fn open_capture(path: &Utf8Path) -> io::Result<Stdio> {
    Ok(Stdio::from(std::fs::File::create(path)?))
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::{
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };
    if let Some(pid) = pid {
        if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("failed to kill process group {pid}: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// The trailing bytes of a capture file, or empty when unreadable.
fn read_tail(path: &Utf8Path) -> String {
    use std::io::{Read, Seek, SeekFrom};
    let Ok(mut file) = std::fs::File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len > CAPTURE_TAIL_BYTES && file.seek(SeekFrom::End(-(CAPTURE_TAIL_BYTES as i64))).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
