use crate::error::BotError;
use crate::process::ProcessId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Prefix marking standard error chunks in a bot's log
pub const STDERR_TAG: &str = "[ERROR] ";

/// One append-only, human-readable text file per bot.
///
/// Files are never rotated or truncated.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.log"))
    }

    /// Append a raw chunk verbatim
    pub async fn append(&self, name: &str, text: &str) -> Result<(), BotError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append a standard error chunk, tagged so it can be told apart from stdout
    pub async fn append_stderr(&self, name: &str, text: &str) -> Result<(), BotError> {
        self.append(name, &format!("{STDERR_TAG}{text}")).await
    }

    pub async fn mark_started(&self, name: &str, pid: Option<ProcessId>) -> Result<(), BotError> {
        let pid = pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());
        let marker = format!("\n[{}] Bot {name} started (pid {pid})\n", timestamp());
        self.append(name, &marker).await
    }

    pub async fn mark_closed(&self, name: &str, exit_code: Option<i32>) -> Result<(), BotError> {
        let marker = match exit_code {
            Some(code) => format!("\n[{}] Bot {name} closed with code {code}\n", timestamp()),
            None => format!("\n[{}] Bot {name} closed by signal\n", timestamp()),
        };
        self.append(name, &marker).await
    }

    /// Full log text for a bot
    pub async fn read(&self, name: &str) -> Result<String, BotError> {
        match tokio::fs::read(self.path(name)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BotError::NotFound(format!("Log for bot {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
