use serde::{Deserialize, Serialize};

/// Something a bot did, as observed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    /// A chunk read from the bot's standard output
    Output { name: String, text: String },
    /// A chunk read from the bot's standard error
    ErrorOutput { name: String, text: String },
    /// The bot's process was spawned
    Started { name: String },
    /// The bot's process exited; `exit_code` is `None` when killed by a signal
    Closed {
        name: String,
        exit_code: Option<i32>,
    },
    /// A failure tied to a specific bot that did not come from its own output
    Error { name: String, message: String },
}

impl BotEvent {
    pub fn name(&self) -> &str {
        match self {
            BotEvent::Output { name, .. }
            | BotEvent::ErrorOutput { name, .. }
            | BotEvent::Started { name }
            | BotEvent::Closed { name, .. }
            | BotEvent::Error { name, .. } => name,
        }
    }
}

/// Messages a control-plane client sends to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    StartBot {
        #[serde(alias = "botName")]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_url: Option<String>,
    },
    StopBot {
        #[serde(alias = "botName")]
        name: String,
    },
    RestartBot {
        #[serde(alias = "botName")]
        name: String,
    },
    SendCommand {
        #[serde(alias = "botName")]
        name: String,
        command: String,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &str {
        match self {
            ClientMessage::StartBot { name, .. }
            | ClientMessage::StopBot { name }
            | ClientMessage::RestartBot { name }
            | ClientMessage::SendCommand { name, .. } => name,
        }
    }
}

/// Messages the server pushes to control-plane clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    BotStarted {
        name: String,
    },
    BotOutput {
        name: String,
        output: String,
    },
    BotError {
        name: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    BotClosed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    BotStopped {
        name: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<BotEvent> for ServerMessage {
    fn from(event: BotEvent) -> Self {
        match event {
            BotEvent::Output { name, text } => ServerMessage::BotOutput { name, output: text },
            BotEvent::ErrorOutput { name, text } => ServerMessage::BotError { name, error: text },
            BotEvent::Started { name } => ServerMessage::BotStarted { name },
            BotEvent::Closed { name, exit_code } => ServerMessage::BotClosed { name, exit_code },
            BotEvent::Error { name, message } => ServerMessage::Error {
                message: format!("{name}: {message}"),
            },
        }
    }
}
