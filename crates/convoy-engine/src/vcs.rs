//! Version-control collaborator used by rollback.

use convoy_core::config::VcsConfig;
use convoy_core::{EngineError, EngineResult};
use std::path::PathBuf;
use std::process::Command;

/// Operations rollback needs from version control.
pub trait VersionControl: Send + Sync {
    /// Current revision identifier.
    fn head_revision(&self) -> EngineResult<String>;

    /// Hard-reset the working tree to the previous revision.
    fn reset_previous(&self) -> EngineResult<()>;

    /// Files that differ between two revisions.
    fn changed_files(&self, from: &str, to: &str) -> EngineResult<Vec<String>>;
}

/// Captured output of one version-control invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// `git` driven through its command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    work_dir: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        Self::new(&config.program, &config.work_dir)
    }

    fn run(&self, args: &[&str]) -> EngineResult<CommandOutput> {
        tracing::debug!(program = %self.program, ?args, cwd = %self.work_dir.display(), "running vcs command");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| EngineError::External(format!("failed to run {}: {e}", self.program)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        if !result.success() {
            return Err(EngineError::External(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                result.exit_code,
                result.stderr.trim()
            )));
        }
        Ok(result)
    }
}

impl VersionControl for GitCli {
    fn head_revision(&self) -> EngineResult<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.stdout.trim().to_string())
    }

    fn reset_previous(&self) -> EngineResult<()> {
        self.run(&["reset", "--hard", "HEAD~1"])?;
        Ok(())
    }

    fn changed_files(&self, from: &str, to: &str) -> EngineResult<Vec<String>> {
        let out = self.run(&["diff", "--name-only", from, to])?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}
