//! Child process execution with explicit options, timeouts, and captured output.
//!
//! Every invocation owns its child handle and reader threads; nothing is shared
//! between calls, so independent invocations may run concurrently.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK_BYTES: usize = 8192;

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Pipe both streams and return them in [`ProcessOutput`].
    #[default]
    Capture,
    /// Share the parent's terminal; captured buffers stay empty.
    Inherit,
}

/// Immutable description of how to run a command.
///
/// The child environment is exactly `env`. Use [`ExecOptions::inheriting_env`]
/// to start from a snapshot of the current process environment.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    /// `None` or zero disables the timeout.
    pub timeout: Option<Duration>,
    pub env: BTreeMap<String, String>,
    pub stdio: StdioMode,
    pub stdin: Option<Vec<u8>>,
}

impl ExecOptions {
    pub fn inheriting_env() -> Self {
        let env = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self {
            env,
            ..Self::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }
}

/// Result of one finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process did not exit normally (e.g. killed by a signal).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout and stderr joined for feedback into prompts.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Failures that prevent a result from being produced at all.
///
/// A non-zero exit or a timeout is not an error; both are reported through
/// [`ProcessOutput`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{action} `{program}`: {source}")]
    Io {
        program: String,
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("output reader for `{program}` panicked")]
    ReaderPanicked { program: String },
}

type Chunks = Vec<Vec<u8>>;

/// How long readers may keep draining after a timed-out child is killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Run `program` with `args` and wait for it to finish.
///
/// On unix the child leads its own process group, and a timeout kills the
/// whole group so descendants holding the output pipes die with it.
#[instrument(
    skip_all,
    fields(
        program = %program,
        timeout_ms = options.effective_timeout().map(|t| t.as_millis() as u64)
    )
)]
pub fn execute<I, S>(
    program: &str,
    args: I,
    options: &ExecOptions,
) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).env_clear().envs(&options.env);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    if options.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    match options.stdio {
        StdioMode::Capture => cmd.stdout(Stdio::piped()).stderr(Stdio::piped()),
        StdioMode::Inherit => cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            error!(err = %source, "failed to spawn command");
            return Err(ProcessError::Spawn {
                program: program.to_string(),
                source,
            });
        }
    };

    let stdout_reader = child.stdout.take().map(OutputReader::spawn);
    let stderr_reader = child.stderr.take().map(OutputReader::spawn);
    let stdin_handle = match (child.stdin.take(), options.stdin.clone()) {
        (Some(mut pipe), Some(input)) => Some(thread::spawn(move || pipe.write_all(&input))),
        _ => None,
    };

    let waited = wait_with_deadline(&mut child, options.effective_timeout())
        .map_err(|(action, source)| ProcessError::Io {
            program: program.to_string(),
            action,
            source,
        });
    // After a kill, a descendant outside the group may still hold a pipe.
    let drain_deadline = match &waited {
        Ok((_, true)) => Some(Instant::now() + KILL_DRAIN_GRACE),
        _ => None,
    };
    let stdout = OutputReader::finish(stdout_reader, program, drain_deadline);
    let stderr = OutputReader::finish(stderr_reader, program, drain_deadline);
    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Err(err)) if err.kind() != io::ErrorKind::BrokenPipe => {
                warn!(err = %err, "failed to write child stdin");
            }
            Ok(_) => {}
            Err(_) => warn!("stdin writer thread panicked"),
        }
    }

    let (exit_code, timed_out) = waited?;
    let output = ProcessOutput {
        stdout: stdout?,
        stderr: stderr?,
        exit_code,
        timed_out,
    };
    debug!(exit_code = ?output.exit_code, timed_out, "command finished");
    Ok(output)
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<(Option<i32>, bool), (&'static str, io::Error)> {
    let Some(timeout) = timeout else {
        let status = child.wait().map_err(|err| ("wait for", err))?;
        return Ok((status.code(), false));
    };

    match child.wait_timeout(timeout).map_err(|err| ("wait for", err))? {
        Some(status) => Ok((status.code(), false)),
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            kill_process_tree(child).map_err(|err| ("kill", err))?;
            let status = child.wait().map_err(|err| ("wait after killing", err))?;
            Ok((status.code(), true))
        }
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    match libc::pid_t::try_from(child.id()) {
        Ok(pgid) if signal_process_group(pgid) => Ok(()),
        _ => child.kill(),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_process_group(pgid: libc::pid_t) -> bool {
    // SAFETY: kill(2) only takes integers; a negative pid addresses the group.
    unsafe { libc::kill(-pgid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// One output pipe drained on a detached thread.
///
/// Chunks land in a shared buffer, so whatever was read stays available even
/// when the thread is abandoned after the drain deadline.
struct OutputReader {
    chunks: Arc<Mutex<Chunks>>,
    done: mpsc::Receiver<io::Result<()>>,
}

impl OutputReader {
    fn spawn<R: Read + Send + 'static>(stream: R) -> Self {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = mpsc::channel();
        let sink = Arc::clone(&chunks);
        thread::spawn(move || {
            // The receiver is gone once the caller stopped waiting.
            let _ = done_tx.send(read_chunks(stream, &sink));
        });
        Self { chunks, done }
    }

    fn finish(
        reader: Option<Self>,
        program: &str,
        deadline: Option<Instant>,
    ) -> Result<String, ProcessError> {
        let Some(reader) = reader else {
            return Ok(String::new());
        };
        let finished = match deadline {
            None => reader
                .done
                .recv()
                .map_err(|_| mpsc::RecvTimeoutError::Disconnected),
            Some(deadline) => reader
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match finished {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(ProcessError::Io {
                    program: program.to_string(),
                    action: "read output of",
                    source,
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(ProcessError::ReaderPanicked {
                    program: program.to_string(),
                });
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after kill, keeping partial output");
            }
        }
        let chunks = reader.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }
}

fn read_chunks<R: Read>(mut reader: R, sink: &Mutex<Chunks>) -> io::Result<()> {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf[..n].to_vec());
    }
}
