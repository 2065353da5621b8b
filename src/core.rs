use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serenity::{
    model::id::{ChannelId, UserId},
    prelude::Mentionable,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::{
    config::SharedSettings,
    voice::{Platform, SessionManager},
};

/// Period of the reconciliation timer.
pub static RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

static PERMISSION_DENIED: &str = ":x: You do not have permission to use this command.";

/// A slash command invocation, stripped of everything but what the bot acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    SetStreamLink(String),
    SetChannel(ChannelId),
    Reload,
    Info,
}

impl RadioCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetStreamLink(_) => "set-streamlink",
            Self::SetChannel(_) => "set-channel",
            Self::Reload => "reload",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub caller: UserId,

    /// Human readable name of the caller, for logs.
    pub caller_tag: String,

    pub command: RadioCommand,
}

/// Work to do once the reply has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterReply {
    RestartPlayback,
}

/// Private reply to an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub content: String,
    pub after_reply: Option<AfterReply>,
}

impl Response {
    fn reply<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            after_reply: None,
        }
    }
}

/// Application state: the settings, the voice session and the process start
/// time. One instance lives for the whole process.
pub struct Radio<P: Platform> {
    settings: SharedSettings,
    sessions: SessionManager<P>,
    started_at: Instant,
}

impl<P: Platform> Radio<P> {
    /// `started_at` is when the process started; uptime is counted from it.
    pub fn new(
        platform: Arc<P>,
        settings: SharedSettings,
        ready_timeout: Duration,
        started_at: Instant,
    ) -> Self {
        Self {
            sessions: SessionManager::new(platform, Arc::clone(&settings), ready_timeout),
            settings,
            started_at,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Decides the reply to `invocation` and applies its settings change.
    ///
    /// Only `info` is open to everyone; every other command requires the
    /// caller to be the configured owner. Changing the stream link or the
    /// channel takes effect on the next reload or reconciliation tick.
    pub fn dispatch(&self, invocation: &Invocation) -> Response {
        let Invocation {
            caller,
            caller_tag,
            command,
        } = invocation;

        let is_owner = self.settings.read().settings().is_owner(*caller);
        match command {
            RadioCommand::Info => {
                info!("Info command executed by {caller_tag}");
                Response::reply(self.info_message())
            }
            _ if !is_owner => {
                error!(
                    user = %caller, command = command.name(),
                    "Permission error: {caller_tag} attempted to execute {}",
                    command.name()
                );
                Response::reply(PERMISSION_DENIED)
            }
            RadioCommand::SetStreamLink(link) => {
                match self.settings.write().update(|s| s.stream_link = Some(link.clone())) {
                    Ok(()) => {
                        info!("Stream link set to {link} by {caller_tag}");
                        Response::reply(format!(":white_check_mark: Stream link set to {link}"))
                    }
                    Err(e) => save_failed(e),
                }
            }
            RadioCommand::SetChannel(channel_id) => {
                match self.settings.write().update(|s| s.channel_id = Some(*channel_id)) {
                    Ok(()) => {
                        info!("Channel set to {channel_id} by {caller_tag}");
                        Response::reply(format!(
                            ":white_check_mark: Channel set to {}",
                            channel_id.mention()
                        ))
                    }
                    Err(e) => save_failed(e),
                }
            }
            RadioCommand::Reload => {
                let store = self.settings.read();
                let content = match store.save() {
                    Ok(()) => format!(
                        ":white_check_mark: Configuration reloaded\n:musical_note: Play link: {}",
                        store.settings().stream_link().unwrap_or("not set")
                    ),
                    Err(e) => save_failed(e).content,
                };
                info!("Configuration reloaded by {caller_tag}");
                Response {
                    content,
                    after_reply: Some(AfterReply::RestartPlayback),
                }
            }
        }
    }

    pub async fn after_reply(&self, action: AfterReply) {
        match action {
            AfterReply::RestartPlayback => {
                self.sessions.stop_playback().await;
                self.sessions.check_voice_channel().await;
            }
        }
    }

    /// Re-checks the voice session now and then every `period`, forever.
    pub async fn reconcile(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sessions.check_voice_channel().await;
        }
    }

    fn info_message(&self) -> String {
        let owner = self
            .settings
            .read()
            .settings()
            .owner_id
            .map_or_else(|| "not set".to_owned(), |id| id.mention().to_string());
        format!(
            ":white_heart: Owner: {owner}\n:file_folder: Version: {} v{}\n:clock3: Uptime: {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            format_uptime(self.uptime().as_secs())
        )
    }
}

fn save_failed(e: anyhow::Error) -> Response {
    error!("Failed to save settings: {e:?}");
    Response::reply(format!(":x: Failed to save settings: {e}"))
}

/// Formats `seconds` as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
