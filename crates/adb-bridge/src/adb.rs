//! ADB (Android Debug Bridge) Client
//!
//! Spawns the adb executable and collects its fully buffered output.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use tokio::process::Command;
use tracing::debug;

/// ADB errors
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("Cannot find executable: {0}")]
    ExecutableNotFound(String),
    #[error("ADB command failed: {0}")]
    ProcessFailure(String),
    #[error("Unexpected ADB response: {0}")]
    InvalidResponse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that can run an adb invocation and hand back its stdout.
#[async_trait]
pub trait AdbRunner: Send + Sync {
    /// Run adb with `args` appended to the configured base arguments.
    async fn execute(&self, args: &[String]) -> Result<String, AdbError>;

    /// Run `adb version`, the cheapest check that the bridge is runnable.
    async fn version(&self) -> Result<String, AdbError> {
        self.execute(&["version".to_string()]).await
    }
}

/// ADB Client
pub struct AdbClient {
    executable: PathBuf,
    base_args: Vec<String>,
}

impl AdbClient {
    /// Create a client for an already resolved executable
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            base_args: Vec::new(),
        }
    }

    /// Create a client from a user supplied executable path.
    ///
    /// See [`resolve_executable`] for the accepted forms.
    pub fn from_config(raw_path: &str, base_args: Vec<String>, workspace_root: &Path) -> Self {
        Self::new(resolve_executable(raw_path, workspace_root)).with_args(base_args)
    }

    /// Arguments placed before every command (e.g. `-H host -P port`)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Get the ADB executable path
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn base_args(&self) -> &[String] {
        &self.base_args
    }
}

#[async_trait]
impl AdbRunner for AdbClient {
    async fn execute(&self, args: &[String]) -> Result<String, AdbError> {
        debug!("adb {:?} {:?}", self.base_args, args);

        let output = Command::new(&self.executable)
            .args(&self.base_args)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    AdbError::ExecutableNotFound(self.executable.display().to_string())
                }
                _ => AdbError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdbError::ProcessFailure(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// ADB command builder
#[derive(Debug, Clone, Default)]
pub struct AdbCommand {
    serial: Option<String>,
    args: Vec<String>,
}

impl AdbCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, serial: &str) -> Self {
        self.serial = Some(serial.to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// `shell <command>`, passed to the device as a single argument
    pub fn shell(mut self, command: &str) -> Self {
        self.args.push("shell".to_string());
        self.args.push(command.to_string());
        self
    }

    /// Final argument list, with `-s <serial>` first when a device is set
    pub fn into_args(self) -> Vec<String> {
        match self.serial {
            Some(serial) => {
                let mut full_args = vec!["-s".to_string(), serial];
                full_args.extend(self.args);
                full_args
            }
            None => self.args,
        }
    }

    pub async fn run(self, runner: &dyn AdbRunner) -> Result<String, AdbError> {
        let args = self.into_args();
        runner.execute(&args).await
    }
}

/// Resolve a configured executable path.
///
/// `$NAME` is replaced by the environment variable (left as written when
/// unset), a leading `~` expands to the home directory, and `./` or `../`
/// are taken relative to `workspace_root`. A result containing a path
/// separator is made absolute; a bare name is returned unchanged so the OS
/// search path applies.
pub fn resolve_executable(raw: &str, workspace_root: &Path) -> PathBuf {
    let expanded = expand_env_vars(raw.trim());

    let path = if expanded == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(&expanded))
    } else if let Some(rest) = expanded
        .strip_prefix("~/")
        .or_else(|| expanded.strip_prefix("~\\"))
    {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(&expanded),
        }
    } else {
        PathBuf::from(&expanded)
    };

    let has_separator = path.to_string_lossy().chars().any(std::path::is_separator);
    if has_separator && !path.is_absolute() {
        workspace_root.join(path)
    } else {
        path
    }
}

fn expand_env_vars(raw: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let pattern = ENV_VAR
        .get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid env var pattern"));
    pattern
        .replace_all(raw, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
