//! Worker process spawning.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use keepsake_core::config::KeepsakeConfig;
use tokio::process::Child;

use crate::client::Connection;

/// Program, arguments and environment for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Launcher for the configured archive. The worker binary defaults to
    /// `keepsake-worker` beside the running executable.
    pub fn from_config(config: &KeepsakeConfig, config_path: Option<&Path>) -> Result<Self> {
        let program = match &config.host.worker_program {
            Some(program) => program.clone(),
            None => default_program()?,
        };
        let mut launcher = Self::new(program)
            .arg("--archive-dir")
            .arg(config.archive.root());
        if let Some(path) = config_path {
            launcher = launcher.arg("--config").arg(path);
        }
        Ok(launcher)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start the worker with piped stdin/stdout. Its stderr is inherited so
    /// worker logs land wherever the host's do. The child is killed if the
    /// returned handle is dropped.
    pub fn spawn(&self) -> Result<(Child, Connection)> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning worker {}", self.program.display()))?;

        let stdin = child.stdin.take().context("worker stdin is not piped")?;
        let stdout = child.stdout.take().context("worker stdout is not piped")?;

        tracing::info!(
            program = %self.program.display(),
            pid = child.id(),
            "worker spawned"
        );
        Ok((child, Connection::new(stdout, stdin)))
    }
}

fn default_program() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating current executable")?;
    Ok(exe.with_file_name(format!(
        "keepsake-worker{}",
        std::env::consts::EXE_SUFFIX
    )))
}
