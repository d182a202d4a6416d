use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Timing knobs used by the supervisor when stopping and restarting bots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Settling delay between a confirmed exit and the next start on restart (in milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// How long a restart waits for the old process to exit before force killing it (in milliseconds)
    #[serde(default = "default_exit_timeout_ms")]
    pub exit_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping a bot (in milliseconds)
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            exit_timeout_ms: default_exit_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl TimingConfig {
    /// Near-zero delays, handy for tests and local tinkering
    pub fn immediate() -> Self {
        Self {
            restart_delay_ms: 0,
            exit_timeout_ms: 2_000,
            kill_grace_ms: 200,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exit_timeout_ms == 0 {
            return Err(anyhow::anyhow!("exit_timeout_ms must be greater than zero"));
        }

        if self.kill_grace_ms > self.exit_timeout_ms {
            return Err(anyhow::anyhow!(
                "kill_grace_ms cannot be greater than exit_timeout_ms"
            ));
        }

        if self.restart_delay_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "restart_delay_ms should not exceed 60 seconds"
            ));
        }

        Ok(())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Main supervisor configuration
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option))]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Directory holding one working copy per bot
    pub bots_dir: PathBuf,
    /// Directory holding one `<name>.log` file per bot
    pub logs_dir: PathBuf,
    /// Entry command launched inside the bot's working directory
    #[builder(default = "default_command()")]
    #[serde(default = "default_command")]
    pub command: String,
    #[builder(default = "default_args()")]
    #[builder(setter(custom))]
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Command used to install a bot's dependencies
    #[builder(default = "default_install_command()")]
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[builder(default = "default_install_args()")]
    #[builder(setter(custom))]
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    /// Repository cloned when a start request does not name one
    #[builder(default)]
    #[serde(default)]
    pub default_repo_url: Option<String>,
    /// Treat a failed `git pull` on an existing working copy as a start failure
    #[builder(default)]
    #[serde(default)]
    pub fail_on_pull_error: bool,
    /// Capacity of the broadcast channel feeding connected clients
    #[builder(default = "default_event_capacity()")]
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[builder(default)]
    #[serde(default)]
    pub timing: TimingConfig,
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.trim().is_empty() {
            return Err(anyhow::anyhow!("entry command cannot be empty"));
        }
        if self.install_command.trim().is_empty() {
            return Err(anyhow::anyhow!("install command cannot be empty"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow::anyhow!("event_capacity must be greater than zero"));
        }
        if self.bots_dir == self.logs_dir {
            return Err(anyhow::anyhow!(
                "bots_dir and logs_dir must be different directories"
            ));
        }
        self.timing.validate()
    }

    /// Working directory for the named bot
    pub fn bot_dir(&self, name: &str) -> PathBuf {
        self.bots_dir.join(name)
    }
}

impl SupervisorConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.args = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn install_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.install_args = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

// Default value functions for serde and the builder
fn default_command() -> String {
    "npm".to_string()
}
fn default_args() -> Vec<String> {
    vec!["start".to_string()]
}
fn default_install_command() -> String {
    "npm".to_string()
}
fn default_install_args() -> Vec<String> {
    vec!["install".to_string()]
}
fn default_event_capacity() -> usize {
    1024
}
fn default_restart_delay_ms() -> u64 {
    1_000
}
fn default_exit_timeout_ms() -> u64 {
    10_000
}
fn default_kill_grace_ms() -> u64 {
    2_000
}
