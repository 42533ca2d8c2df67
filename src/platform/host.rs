//! Host shell capabilities.
//!
//! Providers never touch processes or files directly. They go through
//! [`CommandRunner`] and [`FileAccess`], which the embedding shell
//! implements. [`LocalHost`] is the implementation used by the CLI.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::elevation::is_elevated;

/// Typed failure reported by the host when a command or file operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    AccessDenied,
    NotFound,
    Other,
}

/// Failure of a host command or file read.
///
/// `stdout` keeps whatever the command printed before failing; some tools
/// (smartctl) use non-zero exit codes for informational status bits.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CommandError {
    pub problem: Option<Problem>,
    pub exit_status: Option<i32>,
    pub message: String,
    pub stdout: String,
}

impl CommandError {
    pub fn new<S: Into<String>>(problem: Option<Problem>, exit_status: Option<i32>, message: S) -> Self {
        Self {
            problem,
            exit_status,
            message: message.into(),
            stdout: String::new(),
        }
    }

    pub fn access_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Some(Problem::AccessDenied), None, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Some(Problem::NotFound), None, message)
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::new(Some(Problem::Other), None, message)
    }

    /// A command that ran to completion with a non-zero exit status.
    pub fn exited<S: Into<String>>(exit_status: Option<i32>, message: S, stdout: String) -> Self {
        Self {
            problem: None,
            exit_status,
            message: message.into(),
            stdout,
        }
    }

    fn from_io(what: &str, err: io::Error) -> Self {
        let problem = match err.kind() {
            io::ErrorKind::NotFound => Problem::NotFound,
            io::ErrorKind::PermissionDenied => Problem::AccessDenied,
            _ => Problem::Other,
        };
        Self::new(Some(problem), None, format!("{}: {}", what, err))
    }
}

/// Run a command line, optionally elevated, and capture its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[&str], superuser: bool) -> Result<String, CommandError>;
}

/// Callback fired with new file contents, or `None` when the file disappears.
pub type WatchCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Read files once, or watch them for content changes.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Read a whole file. A missing file resolves to `Ok(None)`.
    async fn read(&self, path: &str, superuser: bool) -> Result<Option<String>, CommandError>;

    /// Register `callback` for content changes of `path`.
    fn watch(&self, path: &str, interval: Duration, callback: WatchCallback) -> FileWatch;
}

/// Everything a provider needs from the host.
pub trait HostShell: CommandRunner + FileAccess {}

impl<T: CommandRunner + FileAccess> HostShell for T {}

/// Handle for a registered file watch.
///
/// Closing is idempotent. Callbacks passed through [`FileWatch::gate`] are
/// suppressed as soon as `close` returns, even if the watch task already
/// observed a change.
pub struct FileWatch {
    closed: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileWatch {
    pub fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Wrap a callback so it stops firing once this watch is closed.
    pub fn gate(&self, callback: WatchCallback) -> WatchCallback {
        let closed = Arc::clone(&self.closed);
        Arc::new(move |contents| {
            if !closed.load(Ordering::SeqCst) {
                callback(contents);
            }
        })
    }

    /// Attach the background task driving this watch.
    pub fn attach(&self, handle: JoinHandle<()>) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        *self.task.lock() = Some(handle);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for FileWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.close();
    }
}

/// Host implementation for the local machine.
///
/// Elevated commands go through `sudo -n` unless the process already runs
/// as root, so a missing sudo credential surfaces as an access-denied
/// failure instead of blocking on a password prompt.
#[derive(Debug, Clone)]
pub struct LocalHost {
    command_timeout: Duration,
}

impl LocalHost {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CommandRunner for LocalHost {
    async fn run(&self, argv: &[&str], superuser: bool) -> Result<String, CommandError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CommandError::other("empty command line"))?;

        let mut cmd = if superuser && !is_elevated() {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program).args(args);
            cmd
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        log::trace!("Running {:?} (superuser: {})", argv, superuser);

        let output = match timeout(self.command_timeout, cmd.output()).await {
            Err(_) => {
                return Err(CommandError::other(format!(
                    "{} timed out after {}s",
                    program,
                    self.command_timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(CommandError::from_io(program, e)),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code();
        let message = if stderr.is_empty() {
            match code {
                Some(code) => format!("{} exited with status {}", program, code),
                None => format!("{} was terminated by a signal", program),
            }
        } else {
            stderr
        };
        Err(CommandError::exited(code, message, stdout))
    }
}

#[async_trait]
impl FileAccess for LocalHost {
    async fn read(&self, path: &str, superuser: bool) -> Result<Option<String>, CommandError> {
        if superuser && !is_elevated() {
            return match self.run(&["cat", path], true).await {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.message.contains("No such file") => Ok(None),
                Err(e) => Err(e),
            };
        }

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommandError::from_io(path, e)),
        }
    }

    fn watch(&self, path: &str, period: Duration, callback: WatchCallback) -> FileWatch {
        let watch = FileWatch::new();
        let callback = watch.gate(callback);
        let path = path.to_string();

        // sysfs attributes never raise inotify events, so changes are
        // detected by re-reading the file on every tick.
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last: Option<String> = None;
            let mut first = true;

            loop {
                ticker.tick().await;
                let current = match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => Some(contents),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                    Err(e) => {
                        log::debug!("Watch read of {} failed: {}", path, e);
                        continue;
                    }
                };

                if first {
                    first = false;
                    last = current;
                    continue;
                }

                if current != last {
                    last = current.clone();
                    callback(current);
                }
            }
        });
        watch.attach(handle);
        watch
    }
}
