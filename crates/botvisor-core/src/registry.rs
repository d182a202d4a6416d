use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Current phase of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl LifecycleState {
    /// States in which the bot owns a live process
    pub fn is_live(self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Starting => "Starting",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: LifecycleState,
    working_dir: PathBuf,
    /// Bumped on every launch so a stale exit cannot overwrite a newer instance's state
    generation: u64,
}

/// In-memory `name -> state` and `name -> working dir` table.
///
/// Only the supervisor writes to it. Nothing is persisted, so every bot
/// reads as unknown after the supervising process restarts.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.entries.read().get(name).map(|e| e.state)
    }

    pub fn working_dir(&self, name: &str) -> Option<PathBuf> {
        self.entries.read().get(name).map(|e| e.working_dir.clone())
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.entries.read().get(name).map(|e| e.generation)
    }

    /// All known bots and their state, sorted by name
    pub fn snapshot(&self) -> Vec<(String, LifecycleState)> {
        let mut bots: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(name, e)| (name.clone(), e.state))
            .collect();
        bots.sort_by(|a, b| a.0.cmp(&b.0));
        bots
    }

    /// Record a launch attempt: state becomes `Starting` under a fresh generation
    pub fn begin_start(&self, name: &str, working_dir: &Path) -> u64 {
        let mut entries = self.entries.write();
        let entry = entries.entry(name.to_string()).or_insert_with(|| Entry {
            state: LifecycleState::Stopped,
            working_dir: working_dir.to_path_buf(),
            generation: 0,
        });
        entry.generation += 1;
        entry.state = LifecycleState::Starting;
        entry.working_dir = working_dir.to_path_buf();
        entry.generation
    }

    /// Move a live bot to `Stopping`.
    ///
    /// A bot whose exit was already recorded keeps its final state, as does
    /// one whose `generation` was superseded.
    pub fn begin_stop(&self, name: &str, generation: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry)
                if entry.generation == generation
                    && matches!(
                        entry.state,
                        LifecycleState::Starting | LifecycleState::Running
                    ) =>
            {
                entry.state = LifecycleState::Stopping;
                true
            }
            _ => false,
        }
    }

    /// Transition the bot if `generation` is still the current one.
    ///
    /// Returns `false` when a newer launch has superseded `generation`.
    pub fn transition(&self, name: &str, generation: u64, state: LifecycleState) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) if entry.generation == generation => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }
}
