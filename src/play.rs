use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{error, info};

use crate::{config::SharedSettings, voice::Platform};

/// Presence shown while the stream is playing.
pub static RADIO_ACTIVITY: StreamingActivity = StreamingActivity {
    name: "Radio 📻",
    url: "https://twitch.tv/sevcadio",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingActivity {
    pub name: &'static str,
    pub url: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Buffering,
    Playing,
    Paused,
    AutoPaused,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::AutoPaused => "autopaused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Transition(PlayerStatus),
    Error(String),
}

/// What to play: built from the settings every time playback is (re)issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub url: String,

    /// How long the stream may take to become playable before it is dropped.
    pub buffering_timeout: Duration,
}

/// The audio player bound to one voice connection.
///
/// Whenever the player falls idle or is auto-paused, the stream is played
/// again from the settings current at that moment.
pub struct PlaybackController<P: Platform> {
    platform: Arc<P>,
    settings: SharedSettings,
    connection: P::Connection,
    events: UnboundedSender<PlayerEvent>,
    status: Mutex<PlayerStatus>,
}

impl<P: Platform> PlaybackController<P> {
    pub fn new(
        platform: Arc<P>,
        settings: SharedSettings,
        connection: P::Connection,
    ) -> (Self, UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            platform,
            settings,
            connection,
            events,
            status: Mutex::new(PlayerStatus::Idle),
        };
        (controller, rx)
    }

    /// Starts the stream on `connection` and spawns the task reacting to the
    /// player's events. Aborting the returned task detaches the player.
    pub async fn spawn(
        platform: Arc<P>,
        settings: SharedSettings,
        connection: P::Connection,
    ) -> JoinHandle<()> {
        let (controller, rx) = Self::new(platform, settings, connection);
        controller.play().await;
        tokio::spawn(controller.run(rx))
    }

    async fn run(self, mut rx: UnboundedReceiver<PlayerEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
    }

    pub async fn handle(&self, event: PlayerEvent) {
        let to = match event {
            PlayerEvent::Error(e) => {
                error!("Audio player error: {e}");
                return;
            }
            PlayerEvent::Transition(to) => to,
        };

        let from = std::mem::replace(&mut *self.status.lock(), to);
        info!("Audio player transitioned from {from} to {to}");

        match to {
            PlayerStatus::Idle | PlayerStatus::AutoPaused => {
                info!("Player is {to}, attempting to play audio again...");
                self.play().await;
            }
            PlayerStatus::Playing => {
                info!("Player is playing");
                self.platform.set_streaming_presence(&RADIO_ACTIVITY);
            }
            _ => {}
        }
    }

    pub fn status(&self) -> PlayerStatus {
        *self.status.lock()
    }

    async fn play(&self) {
        let source = {
            let store = self.settings.read();
            let settings = store.settings();
            settings.stream_link().map(|url| StreamSource {
                url: url.to_owned(),
                buffering_timeout: settings.buffering_timeout(),
            })
        };
        let Some(source) = source else {
            error!("Stream link is not configured");
            return;
        };

        if let Err(e) = self
            .platform
            .play(&self.connection, source, self.events.clone())
            .await
        {
            error!("Audio player error: {e:?}");
        }
    }
}
