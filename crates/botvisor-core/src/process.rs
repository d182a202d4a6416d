use crate::error::ProcessError;
use crate::stdio::ProcessStdio;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// OS process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited; `code` is `None` when it was terminated by a signal
    Exited { code: Option<i32> },
    /// Waiting on the process failed
    Failed(String),
}

impl ProcessStatus {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited { code } => *code,
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessStatus::Exited { code: Some(0) })
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Both outcomes leave no process behind
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// What to launch and where
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub working_dir: &'a Path,
    pub env: &'a HashMap<String, String>,
}

/// Trait representing a handle to a spawned process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited and been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Take ownership of the piped standard streams; later calls return empty slots
    fn take_stdio(&mut self) -> ProcessStdio;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;
}

/// Process spawning
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle + 'static;

    /// Spawn a new process with piped stdin, stdout and stderr
    async fn spawn_process(&self, request: SpawnRequest<'_>) -> Result<Self::Handle, ProcessError>;
}

/// Process termination including the process group and descendants
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Ask a single process to exit (SIGTERM on Unix)
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, pid: ProcessId) -> TerminationResult;

    /// Find all descendants of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree, children first
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult;

    /// Ask every process in the group led by `pid` to exit (SIGTERM on Unix)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult;

    /// Force kill every process in the group led by `pid` (SIGKILL on Unix)
    async fn kill_process_group(&self, pid: ProcessId) -> TerminationResult;
}

/// High-level process manager trait that combines lifecycle and termination
pub trait ProcessManager: ProcessLifecycle + ProcessTermination + 'static {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_extraction() {
        assert_eq!(ProcessStatus::Exited { code: Some(3) }.exit_code(), Some(3));
        assert_eq!(ProcessStatus::Exited { code: None }.exit_code(), None);
        assert_eq!(ProcessStatus::Failed("wait".to_string()).exit_code(), None);
        assert!(ProcessStatus::Exited { code: Some(0) }.is_success());
        assert!(!ProcessStatus::Exited { code: None }.is_success());
    }

    #[test]
    fn test_termination_result_is_gone() {
        assert!(TerminationResult::Success.is_gone());
        assert!(TerminationResult::ProcessNotFound.is_gone());
        assert!(!TerminationResult::AccessDenied.is_gone());
        assert!(!TerminationResult::Failed("x".to_string()).is_gone());
    }
}
