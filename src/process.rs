//! Centralized command execution with consistent error handling.
//!
//! This module provides a unified API for running external commands against
//! the host and inside the target root, ensuring all commands capture stderr
//! and report their exit status instead of raising on failure. Criticality
//! is decided by the caller, never here.

use anyhow::{Context, Result};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Default bound on how long a single spawned command may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Environment variable overriding the per-command timeout, in seconds.
pub const TIMEOUT_ENV: &str = "POSTCFG_CMD_TIMEOUT_SECS";

/// A command that exceeded its bounded wait and was killed.
///
/// Distinct from ordinary spawn failures so callers can tell a hung external
/// tool apart from a missing or broken one
/// (`err.downcast_ref::<CommandTimeout>()`).
#[derive(Debug, Clone)]
pub struct CommandTimeout {
    /// Program that was killed.
    pub program: String,
    /// The bound that expired.
    pub timeout: Duration,
}

impl fmt::Display for CommandTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' did not finish within {}s and was killed",
            self.program,
            self.timeout.as_secs()
        )
    }
}

impl std::error::Error for CommandTimeout {}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command, or -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Non-empty stdout lines, trimmed.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl Cmd {
    /// Create a new command builder with the configured timeout bound.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            timeout: timeout_from_env(),
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Override the bounded wait for this command.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command, capture output, and wait at most the timeout bound.
    ///
    /// A nonzero exit code is NOT an error here; it comes back in the
    /// result's `code`. Errors are reserved for spawn failures and expired
    /// timeouts (the latter as [`CommandTimeout`]).
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        // Drain pipes on threads so a chatty child can't fill its pipe
        // buffers and deadlock against our bounded wait.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = std::thread::spawn(move || read_to_string_opt(stdout));
        let err_reader = std::thread::spawn(move || read_to_string_opt(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("Failed waiting for '{}'", self.program))?
            {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandTimeout {
                    program: self.program,
                    timeout: self.timeout,
                }
                .into());
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let stdout = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        Ok(CommandResult {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn read_to_string_opt<R: Read>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_string(&mut buf);
    }
    buf
}

fn timeout_from_env() -> Duration {
    std::env::var(TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

// =============================================================================
// Runner seam
// =============================================================================

/// Execution seam between the configuration steps and the outside world.
///
/// Every step talks to the target through this trait, which keeps the steps
/// testable against a scripted runner that records what would have been run.
pub trait Runner {
    /// Execute a command as if inside the target's own filesystem namespace.
    fn run_in_target(&self, argv: &[&str]) -> Result<CommandResult>;

    /// Execute a command directly on the host (against target-relative paths).
    fn run_on_host(&self, argv: &[&str]) -> Result<CommandResult>;

    /// Execute inside the target and capture output for parsing.
    fn capture_in_target(&self, argv: &[&str]) -> Result<CommandResult>;
}

/// Real [`Runner`] backed by `arch-chroot` for in-target execution.
pub struct HostRunner {
    root: PathBuf,
    chroot_helper: PathBuf,
}

impl HostRunner {
    /// Create a runner for the target mounted at `root`.
    ///
    /// Fails if `arch-chroot` is not available on the host; everything this
    /// tool does inside the target goes through it.
    pub fn new(root: &Path) -> Result<Self> {
        let chroot_helper =
            which::which("arch-chroot").context("arch-chroot not found on the host")?;
        Ok(Self {
            root: root.to_path_buf(),
            chroot_helper,
        })
    }

    fn chroot_cmd(&self, argv: &[&str]) -> Cmd {
        Cmd::new(self.chroot_helper.to_string_lossy())
            .arg_path(&self.root)
            .args(argv)
    }
}

impl Runner for HostRunner {
    fn run_in_target(&self, argv: &[&str]) -> Result<CommandResult> {
        self.chroot_cmd(argv).run()
    }

    fn run_on_host(&self, argv: &[&str]) -> Result<CommandResult> {
        let (program, rest) = argv
            .split_first()
            .context("empty argv for host command")?;
        Cmd::new(program).args(rest).run()
    }

    fn capture_in_target(&self, argv: &[&str]) -> Result<CommandResult> {
        self.chroot_cmd(argv).run()
    }
}
