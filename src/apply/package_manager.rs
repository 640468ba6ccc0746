use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::model::Ecosystem;
use crate::process::{run_command, CommandOutcome};

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// What the package manager should bring into the installed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub package: String,
    pub version: String,
}

/// Install and verification commands for one ecosystem. Exit status is the
/// only signal: success or failure, never partial success.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, root: &Path, ecosystem: Ecosystem, request: &InstallRequest) -> CommandOutcome;

    async fn verify(&self, root: &Path, ecosystem: Ecosystem) -> CommandOutcome;
}

/// Runs the real `npm`, `pip` and `go` binaries.
#[derive(Debug, Clone)]
pub struct SystemPackageManager {
    install_timeout: Duration,
    verify_timeout: Duration,
    python: String,
}

impl Default for SystemPackageManager {
    fn default() -> Self {
        Self {
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            python: "python3".to_string(),
        }
    }
}

impl SystemPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Interpreter used for `-m pip` (default `python3`).
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    async fn run(&self, program: &str, args: &[&str], root: &Path, limit: Duration) -> CommandOutcome {
        match run_command(program, args, root, limit).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(program, error = %e, "Failed to start package manager");
                CommandOutcome::failed(127, format!("failed to run {}: {}", program, e))
            }
        }
    }
}

#[async_trait]
impl PackageManager for SystemPackageManager {
    async fn install(&self, root: &Path, ecosystem: Ecosystem, request: &InstallRequest) -> CommandOutcome {
        match ecosystem {
            // The manifest is already rewritten; a plain install syncs the lockfile.
            Ecosystem::Npm => self.run("npm", &["install"], root, self.install_timeout).await,
            Ecosystem::Pip => {
                let spec = format!("{}=={}", request.package, request.version);
                self.run(&self.python, &["-m", "pip", "install", spec.as_str()], root, self.install_timeout)
                    .await
            }
            Ecosystem::Go => self.run("go", &["mod", "tidy"], root, self.install_timeout).await,
        }
    }

    async fn verify(&self, root: &Path, ecosystem: Ecosystem) -> CommandOutcome {
        match ecosystem {
            Ecosystem::Npm => self.run("npm", &["ls", "--depth=0"], root, self.verify_timeout).await,
            Ecosystem::Pip => self.run(&self.python, &["-m", "pip", "check"], root, self.verify_timeout).await,
            Ecosystem::Go => self.run("go", &["mod", "verify"], root, self.verify_timeout).await,
        }
    }
}
