use crate::hub::EventHub;
use crate::supervisor::ProcessSupervisor;
use botvisor_core::{
    BotError, ClientMessage, DependencyInstaller, LifecycleState, ProcessManager, ServerMessage,
    SourceProvider, validate_bot_name,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One row of the bot listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotSummary {
    pub name: String,
    pub status: LifecycleState,
}

/// Turns control-plane requests into supervisor calls.
///
/// Starting a bot first fetches its source and installs its dependencies.
/// Those steps run outside the supervisor's per-bot lock, so a slow clone
/// never blocks commands for other bots.
pub struct Controller<M: ProcessManager> {
    supervisor: Arc<ProcessSupervisor<M>>,
    source: Arc<dyn SourceProvider>,
    installer: Arc<dyn DependencyInstaller>,
}

impl<M: ProcessManager> Controller<M> {
    pub fn new(
        supervisor: Arc<ProcessSupervisor<M>>,
        source: Arc<dyn SourceProvider>,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            supervisor,
            source,
            installer,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor<M>> {
        &self.supervisor
    }

    pub fn hub(&self) -> &EventHub {
        self.supervisor.hub()
    }

    /// Execute one client request.
    ///
    /// Returns the reply meant only for the requester, if any. Lifecycle and
    /// output events reach every client through the hub instead.
    pub async fn handle(&self, message: ClientMessage) -> Result<Option<ServerMessage>, BotError> {
        debug!("Handling {:?}", message);
        match message {
            ClientMessage::StartBot { name, repo_url } => {
                self.start(&name, repo_url.as_deref()).await?;
                Ok(None)
            }
            ClientMessage::StopBot { name } => {
                let stopped = self.supervisor.stop(&name).await?;
                Ok(Some(ServerMessage::BotStopped { name: stopped.name }))
            }
            ClientMessage::RestartBot { name } => {
                self.restart(&name).await?;
                Ok(None)
            }
            ClientMessage::SendCommand { name, command } => {
                self.supervisor.send_command(&name, &command).await?;
                Ok(None)
            }
        }
    }

    async fn start(&self, name: &str, repo_url: Option<&str>) -> Result<(), BotError> {
        validate_bot_name(name)?;
        // Skip the fetch entirely when the answer is already known
        if self.supervisor.is_running(name) {
            return Err(BotError::AlreadyRunning(name.to_string()));
        }

        let repo_url = repo_url.or(self.supervisor.config().default_repo_url.as_deref());
        let path = self.source.ensure(repo_url, name).await?;
        self.installer.install(&path).await?;

        let started = self.supervisor.start(name, &path).await?;
        info!("Bot {} started (PID: {:?})", started.name, started.pid);
        Ok(())
    }

    /// Restart in the directory the bot last ran from, without fetching again
    async fn restart(&self, name: &str) -> Result<(), BotError> {
        validate_bot_name(name)?;
        let path = self
            .supervisor
            .registry()
            .working_dir(name)
            .unwrap_or_else(|| self.supervisor.config().bot_dir(name));
        if !tokio::fs::try_exists(&path).await? {
            return Err(BotError::NotFound(format!("Bot {name}")));
        }
        self.supervisor.restart(name, &path).await?;
        Ok(())
    }

    /// Every bot with a working copy on disk or a registry entry, by name
    pub async fn list_bots(&self) -> Result<Vec<BotSummary>, BotError> {
        let mut bots: BTreeMap<String, LifecycleState> = BTreeMap::new();

        let bots_dir = &self.supervisor.config().bots_dir;
        if tokio::fs::try_exists(bots_dir).await? {
            let mut entries = tokio::fs::read_dir(bots_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if validate_bot_name(name).is_ok() {
                        bots.insert(name.to_string(), LifecycleState::Stopped);
                    }
                }
            }
        }

        for (name, state) in self.supervisor.registry().snapshot() {
            bots.insert(name, state);
        }

        Ok(bots
            .into_iter()
            .map(|(name, status)| BotSummary { name, status })
            .collect())
    }

    pub async fn read_log(&self, name: &str) -> Result<String, BotError> {
        validate_bot_name(name)?;
        self.supervisor.logs().read(name).await
    }
}

/// Text of the `error` reply sent back to the requester of `message`
pub fn describe_error(message: &ClientMessage, error: &BotError) -> String {
    let starting = matches!(
        message,
        ClientMessage::StartBot { .. } | ClientMessage::RestartBot { .. }
    );
    if starting && !error.is_state_conflict() && !matches!(error, BotError::InvalidName(_)) {
        format!("Failed to start bot: {error}")
    } else {
        error.to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::factory::PlatformProcessManager;
    use crate::hub::Delivery;
    use async_trait::async_trait;
    use botvisor_core::{BotEvent, SupervisorConfig, TimingConfig};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes a `run.sh` into the bot directory instead of cloning anything
    struct ScriptSource {
        bots_dir: PathBuf,
        script: String,
        calls: Mutex<Vec<(Option<String>, String)>>,
    }

    #[async_trait]
    impl SourceProvider for ScriptSource {
        async fn ensure(&self, repo_url: Option<&str>, name: &str) -> Result<PathBuf, BotError> {
            self.calls
                .lock()
                .push((repo_url.map(str::to_string), name.to_string()));
            let path = self.bots_dir.join(name);
            std::fs::create_dir_all(&path)?;
            std::fs::write(path.join("run.sh"), &self.script)?;
            Ok(path)
        }
    }

    struct FixedInstaller(Option<i32>);

    #[async_trait]
    impl DependencyInstaller for FixedInstaller {
        async fn install(&self, _path: &Path) -> Result<(), BotError> {
            match self.0 {
                None => Ok(()),
                Some(code) => Err(BotError::Install {
                    exit_code: Some(code),
                }),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        source: Arc<ScriptSource>,
        controller: Controller<PlatformProcessManager>,
    }

    fn fixture(script: &str, install_exit: Option<i32>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::builder()
            .bots_dir(dir.path().join("bots"))
            .logs_dir(dir.path().join("logs"))
            .command("sh")
            .args(["run.sh"])
            .default_repo_url("https://example.com/default.git")
            .timing(TimingConfig::immediate())
            .build()
            .unwrap();
        let hub = EventHub::new(64);
        let supervisor = Arc::new(ProcessSupervisor::new(
            <PlatformProcessManager as ProcessManager>::new(),
            config,
            hub,
        ));
        let source = Arc::new(ScriptSource {
            bots_dir: dir.path().join("bots"),
            script: script.to_string(),
            calls: Mutex::new(Vec::new()),
        });
        let controller = Controller::new(
            supervisor,
            source.clone(),
            Arc::new(FixedInstaller(install_exit)),
        );
        Fixture {
            _dir: dir,
            source,
            controller,
        }
    }

    fn start(name: &str) -> ClientMessage {
        ClientMessage::StartBot {
            name: name.to_string(),
            repo_url: None,
        }
    }

    #[tokio::test]
    async fn test_start_uses_default_repo_and_broadcasts() {
        let fx = fixture("echo ready", None);
        let mut events = fx.controller.hub().subscribe();

        let reply = fx.controller.handle(start("alpha")).await.unwrap();
        assert_eq!(reply, None);
        assert_eq!(
            fx.source.calls.lock().clone(),
            vec![(
                Some("https://example.com/default.git".to_string()),
                "alpha".to_string()
            )]
        );
        assert_eq!(
            events.recv().await,
            Some(Delivery::Event(BotEvent::Started {
                name: "alpha".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_start_running_bot_skips_fetch() {
        let fx = fixture("sleep 30", None);
        fx.controller.handle(start("alpha")).await.unwrap();

        let err = fx.controller.handle(start("alpha")).await.unwrap_err();
        assert!(matches!(err, BotError::AlreadyRunning(_)));
        assert_eq!(fx.source.calls.lock().len(), 1);
        assert_eq!(
            describe_error(&start("alpha"), &err),
            "Bot alpha is already running"
        );

        fx.controller.supervisor().shutdown().await;
    }

    #[tokio::test]
    async fn test_install_failure_aborts_start() {
        let fx = fixture("echo never", Some(1));
        let err = fx.controller.handle(start("alpha")).await.unwrap_err();
        assert!(matches!(err, BotError::Install { exit_code: Some(1) }));
        assert_eq!(
            describe_error(&start("alpha"), &err),
            "Failed to start bot: Dependency installation failed with code 1"
        );
        assert!(!fx.controller.supervisor().is_running("alpha"));
        assert_eq!(fx.controller.supervisor().registry().state("alpha"), None);
    }

    #[tokio::test]
    async fn test_stop_replies_only_to_requester() {
        let fx = fixture("sleep 30", None);
        fx.controller.handle(start("alpha")).await.unwrap();

        let reply = fx
            .controller
            .handle(ClientMessage::StopBot {
                name: "alpha".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            reply,
            Some(ServerMessage::BotStopped {
                name: "alpha".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_send_command_to_stopped_bot() {
        let fx = fixture("echo ready", None);
        let message = ClientMessage::SendCommand {
            name: "alpha".to_string(),
            command: "ping".to_string(),
        };
        let err = fx.controller.handle(message.clone()).await.unwrap_err();
        assert_eq!(describe_error(&message, &err), "Bot alpha is not running");
        assert_eq!(fx.controller.supervisor().registry().state("alpha"), None);
    }

    #[tokio::test]
    async fn test_restart_unknown_bot_is_not_found() {
        let fx = fixture("echo ready", None);
        let message = ClientMessage::RestartBot {
            name: "ghost".to_string(),
        };
        let err = fx.controller.handle(message.clone()).await.unwrap_err();
        assert!(matches!(err, BotError::NotFound(_)));
        assert_eq!(
            describe_error(&message, &err),
            "Failed to start bot: Bot ghost not found"
        );
    }

    #[tokio::test]
    async fn test_list_merges_disk_and_registry() {
        let fx = fixture("sleep 30", None);
        let bots_dir = fx.controller.supervisor().config().bots_dir.clone();
        std::fs::create_dir_all(bots_dir.join("idle")).unwrap();
        std::fs::write(bots_dir.join("notes.txt"), "not a bot").unwrap();
        fx.controller.handle(start("busy")).await.unwrap();

        let bots = fx.controller.list_bots().await.unwrap();
        assert_eq!(
            bots,
            vec![
                BotSummary {
                    name: "busy".to_string(),
                    status: LifecycleState::Running
                },
                BotSummary {
                    name: "idle".to_string(),
                    status: LifecycleState::Stopped
                },
            ]
        );

        fx.controller.supervisor().shutdown().await;
    }

    #[tokio::test]
    async fn test_read_log_after_run() {
        let fx = fixture("echo ready", None);
        let mut events = fx.controller.hub().subscribe();
        fx.controller.handle(start("alpha")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(delivery) = events.recv().await {
                if matches!(delivery, Delivery::Event(BotEvent::Closed { .. })) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let log = fx.controller.read_log("alpha").await.unwrap();
        assert!(log.contains("ready\n"));
        assert!(matches!(
            fx.controller.read_log("ghost").await,
            Err(BotError::NotFound(_))
        ));
    }
}
