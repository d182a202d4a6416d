use botvisor_core::{SupervisorConfig, TimingConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command line and environment configuration of the server binary
#[derive(Parser, Debug, Clone)]
#[command(
    name = "botvisor",
    version,
    about = "Run bot programs and control them over a WebSocket"
)]
pub struct ServerConfig {
    /// Address the HTTP and WebSocket listener binds to
    #[arg(long, env = "BOTVISOR_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Directory holding one working copy per bot
    #[arg(long, env = "BOTVISOR_BOTS_DIR", default_value = "bots")]
    pub bots_dir: PathBuf,

    /// Directory holding one log file per bot
    #[arg(long, env = "BOTVISOR_LOGS_DIR", default_value = "logs")]
    pub logs_dir: PathBuf,

    /// Static files served for any path the API does not handle
    #[arg(long, env = "BOTVISOR_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Repository cloned when a start request does not carry one
    #[arg(long, env = "BOTVISOR_REPO_URL")]
    pub repo_url: Option<String>,

    /// Entry command run inside the bot's working directory
    #[arg(long, env = "BOTVISOR_COMMAND", default_value = "npm")]
    pub command: String,

    /// Arguments of the entry command
    #[arg(
        long = "arg",
        env = "BOTVISOR_ARGS",
        value_delimiter = ' ',
        default_value = "start"
    )]
    pub args: Vec<String>,

    /// Dependency install command
    #[arg(long, env = "BOTVISOR_INSTALL_COMMAND", default_value = "npm")]
    pub install_command: String,

    /// Arguments of the install command
    #[arg(
        long = "install-arg",
        env = "BOTVISOR_INSTALL_ARGS",
        value_delimiter = ' ',
        default_value = "install"
    )]
    pub install_args: Vec<String>,

    /// Refuse to start a bot whose `git pull` failed
    #[arg(long, env = "BOTVISOR_FAIL_ON_PULL_ERROR")]
    pub fail_on_pull_error: bool,

    /// Delay between a confirmed exit and the next start on restart (ms)
    #[arg(long, env = "BOTVISOR_RESTART_DELAY_MS", default_value_t = 1_000)]
    pub restart_delay_ms: u64,

    /// How long to wait for an old process to exit before SIGKILL (ms)
    #[arg(long, env = "BOTVISOR_EXIT_TIMEOUT_MS", default_value_t = 10_000)]
    pub exit_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on stop (ms)
    #[arg(long, env = "BOTVISOR_KILL_GRACE_MS", default_value_t = 2_000)]
    pub kill_grace_ms: u64,

    /// Events buffered per WebSocket client before it is told it lagged
    #[arg(long, env = "BOTVISOR_EVENT_CAPACITY", default_value_t = 1024)]
    pub event_capacity: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "BOTVISOR_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    /// Build and validate the supervisor configuration
    pub fn to_supervisor_config(&self) -> anyhow::Result<SupervisorConfig> {
        let mut builder = SupervisorConfig::builder();
        builder
            .bots_dir(self.bots_dir.clone())
            .logs_dir(self.logs_dir.clone())
            .command(self.command.clone())
            .args(&self.args)
            .install_command(self.install_command.clone())
            .install_args(&self.install_args)
            .fail_on_pull_error(self.fail_on_pull_error)
            .event_capacity(self.event_capacity)
            .timing(TimingConfig {
                restart_delay_ms: self.restart_delay_ms,
                exit_timeout_ms: self.exit_timeout_ms,
                kill_grace_ms: self.kill_grace_ms,
            });
        if let Some(url) = &self.repo_url {
            builder.default_repo_url(url.clone());
        }

        let config = builder.build()?;
        config.validate()?;
        Ok(config)
    }
}
