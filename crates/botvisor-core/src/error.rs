use thiserror::Error;

/// Errors surfaced by supervisor operations.
///
/// The `Display` text is sent verbatim to control-plane clients as the
/// `error{message}` payload, so keep it human-readable.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Bot {0} is already running")]
    AlreadyRunning(String),

    #[error("Bot {0} is not running")]
    NotRunning(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid bot name: {0:?}")]
    InvalidName(String),

    #[error("Failed to clone repository for bot {name}: {message}")]
    Clone { name: String, message: String },

    #[error("Failed to pull latest changes for bot {name}: {message}")]
    Pull { name: String, message: String },

    #[error("Dependency installation failed with code {}", display_code(.exit_code))]
    Install { exit_code: Option<i32> },

    #[error("Failed to spawn bot {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: ProcessError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Check if this error came from fetching or preparing a bot's source
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            BotError::Clone { .. } | BotError::Pull { .. } | BotError::Install { .. }
        )
    }

    /// Check if this error rejects the request because of the bot's current state
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, BotError::AlreadyRunning(_) | BotError::NotRunning(_))
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Error types for process operations at the OS boundary
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_matches_client_messages() {
        assert_eq!(
            BotError::NotRunning("alpha".to_string()).to_string(),
            "Bot alpha is not running"
        );
        assert_eq!(
            BotError::AlreadyRunning("alpha".to_string()).to_string(),
            "Bot alpha is already running"
        );
        assert_eq!(
            BotError::NotFound("Log".to_string()).to_string(),
            "Log not found"
        );
    }

    #[test]
    fn test_install_error_display() {
        let error = BotError::Install { exit_code: Some(1) };
        assert_eq!(error.to_string(), "Dependency installation failed with code 1");

        let error = BotError::Install { exit_code: None };
        assert!(error.to_string().contains("unknown"));
    }

    #[test]
    fn test_error_categorization() {
        assert!(BotError::Install { exit_code: Some(2) }.is_acquisition_failure());
        assert!(
            BotError::Clone {
                name: "a".to_string(),
                message: "boom".to_string()
            }
            .is_acquisition_failure()
        );
        assert!(!BotError::NotRunning("a".to_string()).is_acquisition_failure());

        assert!(BotError::NotRunning("a".to_string()).is_state_conflict());
        assert!(BotError::AlreadyRunning("a".to_string()).is_state_conflict());
        assert!(!BotError::NotFound("a".to_string()).is_state_conflict());
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let error = BotError::Spawn {
            name: "alpha".to_string(),
            source: ProcessError::SpawnFailed("no such file".to_string()),
        };
        let display = format!("{error}");
        assert!(display.contains("alpha"));
        assert!(display.contains("no such file"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
