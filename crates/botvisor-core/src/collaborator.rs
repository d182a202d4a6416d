use crate::error::BotError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Fetches a bot's source into a local working directory.
///
/// Implementations must be safe to call repeatedly: an existing working copy
/// is updated on a best-effort basis instead of cloned again.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Ensure the working copy for `name` exists and return its path.
    ///
    /// `repo_url` is only needed when nothing has been cloned yet.
    async fn ensure(&self, repo_url: Option<&str>, name: &str) -> Result<PathBuf, BotError>;
}

/// Installs a bot's dependencies inside its working directory
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, path: &Path) -> Result<(), BotError>;
}
