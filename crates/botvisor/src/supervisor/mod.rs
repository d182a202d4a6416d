//! Child-process lifecycle for bots.
//!
//! Every bot name gets its own async mutex, so start/stop/restart for one
//! bot are serialized while different bots proceed in parallel. Output,
//! exit handling and stdin writes run in per-instance background tasks and
//! never take that mutex.

mod instance;

use crate::hub::EventHub;
use botvisor_core::{
    BotError, BotEvent, LifecycleState, LogStore, ProcessHandle, ProcessId, ProcessManager,
    ProcessStatus, ProcessTermination, SpawnRequest, StatusRegistry, SupervisorConfig,
    TerminationResult, validate_bot_name,
};
use instance::{InstanceContext, ProcessInstance, wait_exit};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Acknowledgement of a successful launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub name: String,
    pub pid: Option<ProcessId>,
}

/// Acknowledgement of a stop request; the process may still be exiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stopped {
    pub name: String,
}

#[derive(Default)]
struct BotSlot {
    /// The instance accepting commands, if any
    live: Option<ProcessInstance>,
    /// An instance that was told to stop but has not been seen exiting yet
    draining: Option<ProcessInstance>,
}

impl BotSlot {
    /// Forget instances whose exit has already been observed
    fn reap(&mut self) {
        if self.live.as_ref().is_some_and(ProcessInstance::has_exited) {
            self.live = None;
        }
        if self.draining.as_ref().is_some_and(ProcessInstance::has_exited) {
            self.draining = None;
        }
    }
}

/// Owns every bot's process, log and lifecycle state
pub struct ProcessSupervisor<M: ProcessManager> {
    manager: Arc<M>,
    config: Arc<SupervisorConfig>,
    registry: Arc<StatusRegistry>,
    logs: LogStore,
    hub: EventHub,
    slots: parking_lot::Mutex<HashMap<String, Arc<Mutex<BotSlot>>>>,
}

impl<M: ProcessManager> ProcessSupervisor<M> {
    pub fn new(manager: M, config: SupervisorConfig, hub: EventHub) -> Self {
        let logs = LogStore::new(config.logs_dir.clone());
        Self {
            manager: Arc::new(manager),
            config: Arc::new(config),
            registry: Arc::new(StatusRegistry::new()),
            logs,
            hub,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Whether the bot currently has a process that is starting or running
    pub fn is_running(&self, name: &str) -> bool {
        matches!(
            self.registry.state(name),
            Some(LifecycleState::Starting | LifecycleState::Running)
        )
    }

    fn slot(&self, name: &str) -> Arc<Mutex<BotSlot>> {
        self.slots
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Launch the bot's entry command in `working_dir`
    pub async fn start(&self, name: &str, working_dir: &Path) -> Result<Started, BotError> {
        validate_bot_name(name)?;
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        self.start_locked(name, working_dir, &mut slot).await
    }

    /// Signal the bot to terminate without waiting for it to exit
    pub async fn stop(&self, name: &str) -> Result<Stopped, BotError> {
        validate_bot_name(name)?;
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        slot.reap();

        let instance = slot
            .live
            .take()
            .ok_or_else(|| BotError::NotRunning(name.to_string()))?;
        slot.draining = Some(self.begin_stop(name, instance));

        Ok(Stopped {
            name: name.to_string(),
        })
    }

    /// Stop the bot if it runs, wait for the exit to be confirmed, settle,
    /// then start it again. A bot that is not running is simply started.
    pub async fn restart(&self, name: &str, working_dir: &Path) -> Result<Started, BotError> {
        validate_bot_name(name)?;
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        slot.reap();

        if let Some(instance) = slot.live.take() {
            info!("Restarting bot {}", name);
            let draining = self.begin_stop(name, instance);
            self.await_exit(name, draining).await;
        } else if let Some(draining) = slot.draining.take() {
            self.await_exit(name, draining).await;
        }

        let delay = self.config.timing.restart_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.start_locked(name, working_dir, &mut slot).await
    }

    /// Write `text` and a newline to the bot's stdin
    pub async fn send_command(&self, name: &str, text: &str) -> Result<(), BotError> {
        validate_bot_name(name)?;
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        slot.reap();

        let instance = slot
            .live
            .as_ref()
            .ok_or_else(|| BotError::NotRunning(name.to_string()))?;
        if !instance.send_line(text) {
            return Err(BotError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("stdin of bot {name} is closed"),
            )));
        }
        debug!("Queued command for bot {}: {}", name, text);
        Ok(())
    }

    /// Terminate every live bot and wait for their exits. Returns how many
    /// processes were stopped.
    pub async fn shutdown(&self) -> usize {
        let slots: Vec<(String, Arc<Mutex<BotSlot>>)> = self
            .slots
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let mut pending = Vec::new();
        for (name, slot) in slots {
            let mut slot = slot.lock().await;
            slot.reap();
            if let Some(instance) = slot.live.take() {
                pending.push((name.clone(), self.begin_stop(&name, instance)));
            } else if let Some(draining) = slot.draining.take() {
                pending.push((name.clone(), draining));
            }
        }

        let count = pending.len();
        if count > 0 {
            info!("Shutting down {} running bots", count);
        }
        futures::future::join_all(
            pending
                .into_iter()
                .map(|(name, instance)| async move { self.await_exit(&name, instance).await }),
        )
        .await;
        count
    }

    async fn start_locked(
        &self,
        name: &str,
        working_dir: &Path,
        slot: &mut BotSlot,
    ) -> Result<Started, BotError> {
        slot.reap();
        if slot.live.is_some() {
            return Err(BotError::AlreadyRunning(name.to_string()));
        }
        // The previous process must be gone before its replacement exists
        if let Some(draining) = slot.draining.take() {
            self.await_exit(name, draining).await;
        }

        let generation = self.registry.begin_start(name, working_dir);
        let request = SpawnRequest {
            command: &self.config.command,
            args: &self.config.args,
            working_dir,
            env: &self.config.env,
        };

        let handle = match self.manager.spawn_process(request).await {
            Ok(handle) => handle,
            Err(source) => {
                error!("Failed to start bot {}: {}", name, source);
                self.registry
                    .transition(name, generation, LifecycleState::Failed);
                return Err(BotError::Spawn {
                    name: name.to_string(),
                    source,
                });
            }
        };

        let pid = handle.get_pid();
        info!(
            "Bot {} launched `{}` (PID: {:?}) in {}",
            name,
            handle.get_command(),
            pid,
            working_dir.display()
        );
        if let Err(e) = self.logs.mark_started(name, pid).await {
            warn!("Failed to write start marker for bot {}: {}", name, e);
        }

        self.registry
            .transition(name, generation, LifecycleState::Running);
        // Published before the readers exist so it precedes this instance's output
        self.hub.publish(BotEvent::Started {
            name: name.to_string(),
        });

        let ctx = InstanceContext {
            name: name.to_string(),
            generation,
            logs: self.logs.clone(),
            hub: self.hub.clone(),
            registry: self.registry.clone(),
            drain_timeout: self.config.timing.kill_grace(),
        };
        slot.live = Some(instance::launch(ctx, handle));

        Ok(Started {
            name: name.to_string(),
            pid,
        })
    }

    /// Move an instance to Stopping and signal its process group in the
    /// background, escalating to SIGKILL after the grace period.
    fn begin_stop(&self, name: &str, mut instance: ProcessInstance) -> ProcessInstance {
        instance.mark_stopping();
        if !self.registry.begin_stop(name, instance.generation) {
            debug!("Bot {} already settled, leaving its final state", name);
        }
        info!("Stopping bot {}", name);

        if let Some(pid) = instance.pid {
            let manager = self.manager.clone();
            let grace = self.config.timing.kill_grace();
            let exit = instance.exit_signal();
            let name = name.to_string();
            tokio::spawn(async move {
                terminate(manager.as_ref(), &name, pid, grace, exit).await;
            });
        }
        instance
    }

    /// Wait for a stopping instance to exit, force killing it if it
    /// outlives the exit timeout.
    async fn await_exit(&self, name: &str, instance: ProcessInstance) {
        let mut exit = instance.exit_signal();
        let timeout = self.config.timing.exit_timeout();
        if tokio::time::timeout(timeout, wait_exit(&mut exit)).await.is_ok() {
            return;
        }

        warn!(
            "Bot {} did not exit within {:?}, force killing",
            name, timeout
        );
        if let Some(pid) = instance.pid {
            force(self.manager.as_ref(), pid).await;
        }
        if tokio::time::timeout(self.config.timing.kill_grace(), wait_exit(&mut exit))
            .await
            .is_err()
        {
            error!("Bot {} still has not exited after SIGKILL", name);
        }
    }
}

/// SIGTERM the group, then SIGKILL whatever is left once `grace` has passed
async fn terminate<M: ProcessTermination>(
    manager: &M,
    name: &str,
    pid: ProcessId,
    grace: Duration,
    mut exit: watch::Receiver<Option<ProcessStatus>>,
) {
    match manager.terminate_process_group(pid).await {
        TerminationResult::Success => {}
        TerminationResult::ProcessNotFound => {
            // Not a group leader, or it is already gone
            manager.terminate_gracefully(pid).await;
        }
        other => {
            warn!("Signalling bot {} (PID {}) failed: {:?}", name, pid, other);
            manager.terminate_process_tree(pid).await;
            return;
        }
    }

    if tokio::time::timeout(grace, wait_exit(&mut exit)).await.is_err() {
        warn!("Bot {} ignored SIGTERM for {:?}, sending SIGKILL", name, grace);
        force(manager, pid).await;
    }
}

async fn force<M: ProcessTermination>(manager: &M, pid: ProcessId) {
    let result = match manager.kill_process_group(pid).await {
        TerminationResult::ProcessNotFound => manager.force_kill(pid).await,
        other => other,
    };
    if !result.is_gone() {
        warn!("Force kill of PID {} failed: {:?}, walking the process tree", pid, result);
        manager.terminate_process_tree(pid).await;
    }
}
