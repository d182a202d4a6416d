use crate::hub::EventHub;
use botvisor_core::{
    BotEvent, BoxedReader, BoxedWriter, LifecycleState, LogStore, OutputChunks, ProcessHandle,
    ProcessId, ProcessStatus, StatusRegistry, StreamKind,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One live execution of a bot's program, as seen by the supervisor.
///
/// The OS handle itself lives in the exit watcher task; the supervisor keeps
/// the pid for signalling, a command queue feeding stdin and the exit signal.
pub(crate) struct ProcessInstance {
    pub(crate) pid: Option<ProcessId>,
    pub(crate) generation: u64,
    commands: Option<mpsc::UnboundedSender<String>>,
    exit: watch::Receiver<Option<ProcessStatus>>,
    stop_requested: Arc<AtomicBool>,
}

impl ProcessInstance {
    pub(crate) fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Queue a line for the bot's stdin; `false` if stdin is already closed
    pub(crate) fn send_line(&self, text: &str) -> bool {
        match &self.commands {
            Some(tx) => tx.send(format!("{text}\n")).is_ok(),
            None => false,
        }
    }

    /// Flag the coming exit as requested and close stdin
    pub(crate) fn mark_stopping(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.commands = None;
    }

    pub(crate) fn exit_signal(&self) -> watch::Receiver<Option<ProcessStatus>> {
        self.exit.clone()
    }
}

/// Wait until the watcher reports the exit, or forever if it never does
pub(crate) async fn wait_exit(exit: &mut watch::Receiver<Option<ProcessStatus>>) -> ProcessStatus {
    match exit.wait_for(|status| status.is_some()).await {
        Ok(status) => status
            .clone()
            .unwrap_or_else(|| ProcessStatus::Failed("exit signal lost".to_string())),
        Err(_) => ProcessStatus::Failed("exit watcher dropped".to_string()),
    }
}

/// Everything the background tasks of one instance need
pub(crate) struct InstanceContext {
    pub(crate) name: String,
    pub(crate) generation: u64,
    pub(crate) logs: LogStore,
    pub(crate) hub: EventHub,
    pub(crate) registry: Arc<StatusRegistry>,
    /// How long to keep draining pipes after the process exited
    pub(crate) drain_timeout: Duration,
}

/// Wire a freshly spawned process: stdin writer, one reader per output pipe
/// and the exit watcher. Returns the instance record for the supervisor.
pub(crate) fn launch<H: ProcessHandle + 'static>(
    ctx: InstanceContext,
    mut handle: H,
) -> ProcessInstance {
    let pid = handle.get_pid();
    let generation = ctx.generation;
    let stdio = handle.take_stdio();

    let commands = stdio.stdin.map(|stdin| {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_commands(ctx.name.clone(), stdin, rx));
        tx
    });

    let readers: Vec<JoinHandle<()>> = [
        stdio.stdout.map(|r| (StreamKind::Stdout, r)),
        stdio.stderr.map(|r| (StreamKind::Stderr, r)),
    ]
    .into_iter()
    .flatten()
    .map(|(kind, reader)| {
        tokio::spawn(pump_output(
            ctx.name.clone(),
            kind,
            reader,
            ctx.logs.clone(),
            ctx.hub.clone(),
        ))
    })
    .collect();

    let (exit_tx, exit_rx) = watch::channel(None);
    let stop_requested = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_exit(
        ctx,
        handle,
        readers,
        exit_tx,
        stop_requested.clone(),
    ));

    ProcessInstance {
        pid,
        generation,
        commands,
        exit: exit_rx,
        stop_requested,
    }
}

async fn write_commands(
    name: String,
    mut stdin: BoxedWriter,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = rx.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("Failed to write command to bot {}: {}", name, e);
            break;
        }
    }
    debug!("Stdin writer for bot {} finished", name);
}

/// Drain one pipe chunk by chunk: log it, then forward it to clients
async fn pump_output(
    name: String,
    kind: StreamKind,
    reader: BoxedReader,
    logs: LogStore,
    hub: EventHub,
) {
    let mut chunks = OutputChunks::new(kind, reader);
    while let Some(chunk) = chunks.next().await {
        let text = match chunk {
            Ok(text) => text,
            Err(e) => {
                warn!("Reading {:?} of bot {} failed: {}", kind, name, e);
                hub.publish(BotEvent::Error {
                    name: name.clone(),
                    message: format!("output stream error: {e}"),
                });
                break;
            }
        };

        let (logged, event) = match kind {
            StreamKind::Stdout => {
                debug!("botOutput: {} - {}", name, text.trim_end());
                (
                    logs.append(&name, &text).await,
                    BotEvent::Output {
                        name: name.clone(),
                        text,
                    },
                )
            }
            StreamKind::Stderr => (
                logs.append_stderr(&name, &text).await,
                BotEvent::ErrorOutput {
                    name: name.clone(),
                    text,
                },
            ),
        };
        if let Err(e) = logged {
            warn!("Failed to append output of bot {} to its log: {}", name, e);
        }
        hub.publish(event);
    }
}

async fn watch_exit<H: ProcessHandle>(
    ctx: InstanceContext,
    mut handle: H,
    readers: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ProcessStatus>>,
    stop_requested: Arc<AtomicBool>,
) {
    let status = handle
        .wait()
        .await
        .unwrap_or_else(|e| ProcessStatus::Failed(e.to_string()));

    // Output that was already in the pipes still precedes the close event.
    // A leftover grandchild can hold a pipe open, so do not wait forever.
    for mut reader in readers {
        if tokio::time::timeout(ctx.drain_timeout, &mut reader).await.is_err() {
            warn!("Output of bot {} still open after exit, detaching reader", ctx.name);
            reader.abort();
        }
    }

    let exit_code = status.exit_code();
    info!(
        "Bot process ({}) exited with code {:?}",
        ctx.name, exit_code
    );

    if let Err(e) = ctx.logs.mark_closed(&ctx.name, exit_code).await {
        warn!("Failed to write close marker for bot {}: {}", ctx.name, e);
    }

    if let ProcessStatus::Failed(message) = &status {
        ctx.hub.publish(BotEvent::Error {
            name: ctx.name.clone(),
            message: format!("waiting for process failed: {message}"),
        });
    }

    let state = final_state(&status, stop_requested.load(Ordering::SeqCst));
    if !ctx.registry.transition(&ctx.name, ctx.generation, state) {
        debug!(
            "Bot {} generation {} superseded, leaving state untouched",
            ctx.name, ctx.generation
        );
    }

    ctx.hub.publish(BotEvent::Closed {
        name: ctx.name.clone(),
        exit_code,
    });
    let _ = exit_tx.send(Some(status));
}

/// A clean exit or an exit we asked for is `Stopped`, anything else is `Failed`
pub(crate) fn final_state(status: &ProcessStatus, stop_requested: bool) -> LifecycleState {
    if stop_requested || status.is_success() {
        LifecycleState::Stopped
    } else {
        LifecycleState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_state_policy() {
        let clean = ProcessStatus::Exited { code: Some(0) };
        let crashed = ProcessStatus::Exited { code: Some(1) };
        let killed = ProcessStatus::Exited { code: None };

        assert_eq!(final_state(&clean, false), LifecycleState::Stopped);
        assert_eq!(final_state(&crashed, false), LifecycleState::Failed);
        assert_eq!(final_state(&killed, false), LifecycleState::Failed);
        assert_eq!(final_state(&killed, true), LifecycleState::Stopped);
        assert_eq!(final_state(&crashed, true), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_exit_returns_reported_status() {
        let (tx, mut rx) = watch::channel(None);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Some(ProcessStatus::Exited { code: Some(7) })).unwrap();
        });
        assert_eq!(wait_exit(&mut rx).await.exit_code(), Some(7));
    }

    #[tokio::test]
    async fn test_wait_exit_when_watcher_vanishes() {
        let (tx, mut rx) = watch::channel::<Option<ProcessStatus>>(None);
        drop(tx);
        assert!(matches!(wait_exit(&mut rx).await, ProcessStatus::Failed(_)));
    }
}
