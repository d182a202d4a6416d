use anyhow::Result;
use async_trait::async_trait;
use botvisor_core::{
    ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessStdio, ProcessTermination, SpawnRequest, TerminationResult,
};
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// How long a single signalled process gets before SIGKILL
    const SINGLE_GRACE: Duration = Duration::from_millis(500);

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self { child, command }
        }
    }

    fn status_from_exit(status: std::process::ExitStatus) -> ProcessStatus {
        ProcessStatus::Exited {
            code: status.code(),
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        fn get_command(&self) -> &str {
            &self.command
        }

        fn take_stdio(&mut self) -> ProcessStdio {
            ProcessStdio {
                stdin: self
                    .child
                    .stdin
                    .take()
                    .map(|s| Box::new(s) as botvisor_core::BoxedWriter),
                stdout: self
                    .child
                    .stdout
                    .take()
                    .map(|s| Box::new(s) as botvisor_core::BoxedReader),
                stderr: self
                    .child
                    .stderr
                    .take()
                    .map(|s| Box::new(s) as botvisor_core::BoxedReader),
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let status = self.child.wait().await?;
            Ok(status_from_exit(status))
        }
    }

    /// Unix-specific process manager with process group and tree termination
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            <Self as ProcessManager>::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(
            &self,
            request: SpawnRequest<'_>,
        ) -> Result<Self::Handle, ProcessError> {
            let mut cmd = Command::new(request.command);
            cmd.args(request.args)
                .current_dir(request.working_dir)
                .envs(request.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            // Own process group so the whole tree (npm -> node) can be signalled at once
            cmd.process_group(0);

            let child = cmd.spawn().map_err(|e| {
                ProcessError::SpawnFailed(format!(
                    "{} in {}: {e}",
                    request.command,
                    request.working_dir.display()
                ))
            })?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    request.command, pid, request.args
                );
            }

            Ok(UnixProcessHandle::new(child, request.command.to_string()))
        }
    }

    fn signal_result(pid: ProcessId, sig: Signal, result: nix::Result<()>) -> TerminationResult {
        match result {
            Ok(()) => {
                debug!("Sent {} to process {}", sig.as_str(), pid);
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => TerminationResult::ProcessNotFound,
            Err(nix::errno::Errno::EPERM) => {
                warn!("Permission denied to signal process {}", pid);
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!("Failed to send {} to process {}: {}", sig.as_str(), pid, e);
                TerminationResult::Failed(format!("{} failed: {e}", sig.as_str()))
            }
        }
    }

    fn nix_pid(pid: ProcessId) -> NixPid {
        NixPid::from_raw(pid.0 as i32)
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
            signal_result(pid, Signal::SIGTERM, signal::kill(nix_pid(pid), Signal::SIGTERM))
        }

        async fn force_kill(&self, pid: ProcessId) -> TerminationResult {
            signal_result(pid, Signal::SIGKILL, signal::kill(nix_pid(pid), Signal::SIGKILL))
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self
                .system
                .lock()
                .map_err(|_| anyhow::anyhow!("process table lock poisoned"))?;
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }

        async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
            info!("Terminating process tree for root PID {}", root_pid);

            let children = match self.find_child_processes(root_pid).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Failed to find child processes for PID {}: {}", root_pid, e);
                    return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
                }
            };

            // Children were collected deepest first
            for child_pid in &children {
                let result = self.terminate_single_process(*child_pid).await;
                if !result.is_gone() {
                    warn!("Failed to terminate child process {}: {:?}", child_pid, result);
                }
            }

            self.terminate_single_process(root_pid).await
        }

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
            let result = signal::killpg(nix_pid(pid), Signal::SIGTERM);
            if result.is_ok() {
                info!("Sent SIGTERM to process group {}", pid);
            }
            signal_result(pid, Signal::SIGTERM, result)
        }

        async fn kill_process_group(&self, pid: ProcessId) -> TerminationResult {
            let result = signal::killpg(nix_pid(pid), Signal::SIGKILL);
            if result.is_ok() {
                info!("Sent SIGKILL to process group {}", pid);
            }
            signal_result(pid, Signal::SIGKILL, result)
        }
    }

    impl UnixProcessManager {
        /// Terminate a single process by PID with escalation
        async fn terminate_single_process(&self, pid: ProcessId) -> TerminationResult {
            match self.terminate_gracefully(pid).await {
                TerminationResult::Success => {
                    tokio::time::sleep(SINGLE_GRACE).await;
                    match self.force_kill(pid).await {
                        TerminationResult::ProcessNotFound => TerminationResult::Success,
                        other => other,
                    }
                }
                other => other,
            }
        }

        /// Recursively find all child processes, grandchildren before children
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().map(|p| p.as_u32()) == Some(parent_pid) {
                    let child_pid = pid.as_u32();
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            info!("Initializing Unix process manager with system monitoring");
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    async fn spawn(manager: &UnixProcessManager, script: &str) -> UnixProcessHandle {
        let args = sh(script);
        let env = HashMap::new();
        manager
            .spawn_process(SpawnRequest {
                command: "sh",
                args: &args,
                working_dir: Path::new("."),
                env: &env,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_spawn_pipes_stdout_and_exit_code() {
        let manager = <UnixProcessManager as ProcessManager>::new();
        let mut handle = spawn(&manager, "echo ready; exit 3").await;
        assert!(handle.get_pid().is_some());
        assert_eq!(handle.get_command(), "sh");

        let mut stdio = handle.take_stdio();
        let mut out = String::new();
        stdio.stdout.take().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "ready\n");

        let status = handle.wait().await.unwrap();
        assert_eq!(status.exit_code(), Some(3));

        // Streams can only be taken once
        assert!(handle.take_stdio().stdout.is_none());
    }

    #[tokio::test]
    async fn test_stdin_reaches_process() {
        let manager = <UnixProcessManager as ProcessManager>::new();
        let mut handle = spawn(&manager, "read line; echo got:$line").await;
        let mut stdio = handle.take_stdio();

        let mut stdin = stdio.stdin.take().unwrap();
        stdin.write_all(b"ping\n").await.unwrap();
        stdin.flush().await.unwrap();

        let mut out = String::new();
        stdio.stdout.take().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "got:ping\n");
        assert!(handle.wait().await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let manager = <UnixProcessManager as ProcessManager>::new();
        let env = HashMap::new();
        let result = manager
            .spawn_process(SpawnRequest {
                command: "definitely-not-a-real-command-botvisor",
                args: &[],
                working_dir: Path::new("."),
                env: &env,
            })
            .await;
        assert!(matches!(result, Err(ProcessError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_group_termination_kills_grandchildren() {
        let manager = <UnixProcessManager as ProcessManager>::new();
        let mut handle = spawn(&manager, "sleep 30 & wait").await;
        let pid = handle.get_pid().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = manager.terminate_process_group(pid).await;
        assert_eq!(result, TerminationResult::Success);

        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("process group should exit after SIGTERM")
            .unwrap();
        assert_eq!(status.exit_code(), None);
    }

    #[tokio::test]
    async fn test_terminate_unknown_pid_reports_not_found() {
        let manager = <UnixProcessManager as ProcessManager>::new();
        let mut handle = spawn(&manager, "exit 0").await;
        let pid = handle.get_pid().unwrap();
        handle.wait().await.unwrap();

        assert_eq!(
            manager.force_kill(pid).await,
            TerminationResult::ProcessNotFound
        );
    }
}
