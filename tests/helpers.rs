//! Shared test utilities for postcfg tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use postcfg::config::TargetContext;
use postcfg::process::{CommandResult, Runner};

/// Test environment with a temporary mock target root.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock target root (the "mounted volume")
    pub root: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with a minimal target tree.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("target");
        create_mock_target(&root);
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    /// Context over the mock target: offline, default keyring, no disk.
    pub fn context(&self) -> TargetContext {
        TargetContext {
            root: self.root.clone(),
            has_network: false,
            keyrings: vec!["archlinux".to_string()],
            disk: None,
        }
    }

    /// Drop a file into the target at `rel`, creating parents.
    pub fn install_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write target file");
        path
    }
}

/// Create a minimal mock target root with basic structure.
pub fn create_mock_target(root: &Path) {
    let dirs = ["usr/bin", "usr/share", "boot", "etc"];
    for dir in dirs {
        fs::create_dir_all(root.join(dir)).expect("Failed to create mock target dir");
    }
}

/// One command the scripted runner saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Issued via run_in_target / capture_in_target.
    Target(String),
    /// Issued via run_on_host.
    Host(String),
}

impl Call {
    /// The joined argv, regardless of where it ran.
    pub fn command(&self) -> &str {
        match self {
            Call::Target(cmd) | Call::Host(cmd) => cmd,
        }
    }
}

enum Response {
    Exit { code: i32, stdout: String },
    Err(String),
}

/// Scripted [`Runner`] that records every command instead of spawning it.
///
/// Commands match scripted responses by argv prefix; anything unscripted
/// succeeds with empty output.
pub struct ScriptedRunner {
    calls: RefCell<Vec<Call>>,
    responses: RefCell<Vec<(String, Response)>>,
    effects: RefCell<Vec<(String, PathBuf, String)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            responses: RefCell::new(Vec::new()),
            effects: RefCell::new(Vec::new()),
        }
    }

    /// Write a file when a matching command is issued, imitating the
    /// on-disk side effect of the real tool.
    pub fn create_file_on(&self, prefix: &str, path: &Path, content: &str) {
        self.effects.borrow_mut().push((
            prefix.to_string(),
            path.to_path_buf(),
            content.to_string(),
        ));
    }

    /// Script an exit code and stdout for commands starting with `prefix`.
    pub fn respond(&self, prefix: &str, code: i32, stdout: &str) {
        self.responses.borrow_mut().push((
            prefix.to_string(),
            Response::Exit {
                code,
                stdout: stdout.to_string(),
            },
        ));
    }

    /// Script a runner-level error (spawn failure) for matching commands.
    pub fn fail_with(&self, prefix: &str, message: &str) {
        self.responses
            .borrow_mut()
            .push((prefix.to_string(), Response::Err(message.to_string())));
    }

    /// Every command issued so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Joined argv of every command issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c.command().to_string())
            .collect()
    }

    /// How many issued commands start with `prefix`.
    pub fn count_issued(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.command().starts_with(prefix))
            .count()
    }

    /// Whether any issued command starts with `prefix`.
    pub fn issued(&self, prefix: &str) -> bool {
        self.count_issued(prefix) > 0
    }

    fn dispatch(&self, call: Call) -> anyhow::Result<CommandResult> {
        let command = call.command().to_string();
        self.calls.borrow_mut().push(call);

        for (prefix, path, content) in self.effects.borrow().iter() {
            if command.starts_with(prefix.as_str()) {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).expect("Failed to create effect parent dir");
                }
                fs::write(path, content).expect("Failed to write effect file");
            }
        }

        for (prefix, response) in self.responses.borrow().iter() {
            if command.starts_with(prefix.as_str()) {
                return match response {
                    Response::Exit { code, stdout } => Ok(CommandResult {
                        code: *code,
                        stdout: stdout.clone(),
                        stderr: String::new(),
                    }),
                    Response::Err(message) => Err(anyhow::anyhow!("{}", message)),
                };
            }
        }

        Ok(CommandResult {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

impl Runner for ScriptedRunner {
    fn run_in_target(&self, argv: &[&str]) -> anyhow::Result<CommandResult> {
        self.dispatch(Call::Target(argv.join(" ")))
    }

    fn run_on_host(&self, argv: &[&str]) -> anyhow::Result<CommandResult> {
        self.dispatch(Call::Host(argv.join(" ")))
    }

    fn capture_in_target(&self, argv: &[&str]) -> anyhow::Result<CommandResult> {
        self.dispatch(Call::Target(argv.join(" ")))
    }
}
