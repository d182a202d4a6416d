//! Default collaborators that prepare a bot before it is launched: a git
//! checkout per bot and a dependency install command.

use async_trait::async_trait;
use botvisor_core::{
    BotError, DependencyInstaller, SourceProvider, SupervisorConfig, validate_bot_name,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Keeps one git working copy per bot under `bots_dir`
#[derive(Debug, Clone)]
pub struct GitSourceProvider {
    bots_dir: PathBuf,
    fail_on_pull_error: bool,
}

impl GitSourceProvider {
    pub fn new(bots_dir: impl Into<PathBuf>, fail_on_pull_error: bool) -> Self {
        Self {
            bots_dir: bots_dir.into(),
            fail_on_pull_error,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.bots_dir.clone(), config.fail_on_pull_error)
    }
}

#[async_trait]
impl SourceProvider for GitSourceProvider {
    async fn ensure(&self, repo_url: Option<&str>, name: &str) -> Result<PathBuf, BotError> {
        validate_bot_name(name)?;
        let path = self.bots_dir.join(name);

        if tokio::fs::try_exists(&path).await? {
            info!("Updating source of bot {} in {}", name, path.display());
            if let Err(message) = run_git(&["pull"], &path).await {
                if self.fail_on_pull_error {
                    return Err(BotError::Pull {
                        name: name.to_string(),
                        message,
                    });
                }
                warn!(
                    "git pull for bot {} failed, using the existing checkout: {}",
                    name, message
                );
            }
            return Ok(path);
        }

        let url = repo_url.ok_or_else(|| BotError::NotFound(format!("Repository for bot {name}")))?;
        tokio::fs::create_dir_all(&self.bots_dir).await?;

        info!("Cloning {} for bot {}", url, name);
        let target = path.to_string_lossy();
        run_git(&["clone", url, target.as_ref()], &self.bots_dir)
            .await
            .map_err(|message| BotError::Clone {
                name: name.to_string(),
                message,
            })?;
        Ok(path)
    }
}

/// Run git non-interactively; the error carries git's stderr
async fn run_git(args: &[&str], cwd: &Path) -> Result<(), String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;

    if output.status.success() {
        debug!("git {:?} succeeded in {}", args, cwd.display());
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = stderr.trim();
    Err(if message.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        message.to_string()
    })
}

/// Runs an install command (`npm install` by default) in the bot's directory
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    command: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.install_command.clone(), config.install_args.clone())
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, path: &Path) -> Result<(), BotError> {
        info!(
            "Installing dependencies in {} with `{} {}`",
            path.display(),
            self.command,
            self.args.join(" ")
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(forward_lines(out, false)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(forward_lines(err, true)));

        let status = child.wait().await?;
        for task in [stdout, stderr].into_iter().flatten() {
            let _ = task.await;
        }

        if status.success() {
            info!("Dependencies installed in {}", path.display());
            Ok(())
        } else {
            Err(BotError::Install {
                exit_code: status.code(),
            })
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(target: "botvisor::install", "{}", line);
        } else {
            info!(target: "botvisor::install", "{}", line);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandInstaller {
        CommandInstaller::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_install_success() {
        let dir = tempfile::tempdir().unwrap();
        sh("echo installing; echo done >&2").install(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_install_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh("exit 3").install(dir.path()).await.unwrap_err();
        assert!(matches!(err, BotError::Install { exit_code: Some(3) }));
        assert_eq!(err.to_string(), "Dependency installation failed with code 3");
    }

    #[tokio::test]
    async fn test_install_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        sh("touch installed").install(dir.path()).await.unwrap();
        assert!(dir.path().join("installed").exists());
    }

    #[tokio::test]
    async fn test_missing_checkout_without_url_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GitSourceProvider::new(dir.path(), false);
        let err = provider.ensure(None, "alpha").await.unwrap_err();
        assert!(matches!(err, BotError::NotFound(_)));
        assert_eq!(err.to_string(), "Repository for bot alpha not found");
    }

    #[tokio::test]
    async fn test_invalid_name_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GitSourceProvider::new(dir.path(), false);
        let err = provider
            .ensure(Some("https://example.com/x.git"), "../escape")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_failed_pull_is_tolerated_by_default() {
        let dir = tempfile::tempdir().unwrap();
        // A plain directory is not a git checkout, so the pull fails
        std::fs::create_dir(dir.path().join("alpha")).unwrap();

        let provider = GitSourceProvider::new(dir.path(), false);
        let path = provider.ensure(None, "alpha").await.unwrap();
        assert_eq!(path, dir.path().join("alpha"));

        let strict = GitSourceProvider::new(dir.path(), true);
        let err = strict.ensure(None, "alpha").await.unwrap_err();
        assert!(matches!(err, BotError::Pull { .. }));
        assert!(err.is_acquisition_failure());
    }

    #[tokio::test]
    async fn test_failed_clone_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-repo");
        let provider = GitSourceProvider::new(dir.path().join("bots"), false);

        let err = provider
            .ensure(Some(missing.to_str().unwrap()), "alpha")
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Clone { .. }));
        assert!(!dir.path().join("bots").join("alpha").exists());
    }
}
