use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::anyhow;
use serenity::{
    async_trait,
    model::id::{ChannelId, GuildId},
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    task::JoinHandle,
};
use tracing::{error, info};

use crate::{
    config::SharedSettings,
    play::{PlaybackController, PlayerEvent, StreamSource, StreamingActivity},
};

/// Resolves once a freshly opened voice connection is ready to carry audio.
pub type Ready = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("guild {0} is not known to the bot")]
    GuildNotFound(GuildId),

    #[error("channel {0} was not found in the guild")]
    ChannelNotFound(ChannelId),

    #[error("channel {0} is not a voice channel")]
    NotVoice(ChannelId),
}

/// Things a voice connection reports after it has been opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Reconnected,
    Disconnected,
    Error(String),
}

/// Everything the bot needs from the chat platform.
///
/// [`crate::discord::DiscordPlatform`] implements this on top of serenity and
/// songbird. Events flow back to the bot through the channels handed to
/// [`Platform::observe`] and [`Platform::play`].
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Equal connections share their observers, so detaching one detaches
    /// the other.
    type Connection: Clone + PartialEq + Send + Sync + 'static;

    fn resolve_voice_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), LookupError>;

    /// Opens a voice connection. The connection is usable once the returned
    /// [`Ready`] resolves.
    async fn open(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> anyhow::Result<(Self::Connection, Ready)>;

    /// Attaches the error/disconnect observers to `connection`.
    async fn observe(&self, connection: &Self::Connection, events: UnboundedSender<ConnectionEvent>);

    /// Removes every observer attached to `connection`.
    async fn detach(&self, connection: &Self::Connection);

    async fn destroy(&self, connection: &Self::Connection) -> anyhow::Result<()>;

    /// Plays `source` on `connection`, replacing whatever was playing, and
    /// reports the player's state transitions on `events`.
    async fn play(
        &self,
        connection: &Self::Connection,
        source: StreamSource,
        events: UnboundedSender<PlayerEvent>,
    ) -> anyhow::Result<()>;

    fn set_streaming_presence(&self, activity: &StreamingActivity);
}

/// The voice connection the bot currently considers active.
pub struct Session<P: Platform> {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    connection: P::Connection,

    // Tasks draining the connection and player events.
    listeners: Vec<JoinHandle<()>>,
}

impl<P: Platform> Session<P> {
    fn abort_listeners(&self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }

    async fn detach(self, platform: &P) {
        self.abort_listeners();
        platform.detach(&self.connection).await;
    }
}

/// Keeps the bot connected to the configured voice channel.
pub struct SessionManager<P: Platform> {
    platform: Arc<P>,
    settings: SharedSettings,
    session: Mutex<Option<Session<P>>>,
    ready_timeout: Duration,
}

impl<P: Platform> SessionManager<P> {
    pub fn new(platform: Arc<P>, settings: SharedSettings, ready_timeout: Duration) -> Self {
        Self {
            platform,
            settings,
            session: Mutex::new(None),
            ready_timeout,
        }
    }

    /// Joins the configured voice channel and starts the stream there.
    ///
    /// Failures are logged and leave no active session, so calling this again
    /// is always safe. It does not check whether the bot is already connected:
    /// every call opens a new connection and replaces the current session.
    #[tracing::instrument(skip(self))]
    pub async fn check_voice_channel(&self) {
        let target = self.settings.read().settings().target();
        let Some((guild_id, channel_id)) = target else {
            error!("Guild or voice channel is not configured");
            return;
        };

        if let Err(e) = self.platform.resolve_voice_channel(guild_id, channel_id) {
            error!(%guild_id, %channel_id, "Voice channel not found or invalid: {e}");
            return;
        }

        if let Err(e) = self.establish(guild_id, channel_id).await {
            error!(%guild_id, %channel_id, "Error joining voice channel: {e:?}");
        }
    }

    async fn establish(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<()> {
        let (connection, ready) = self.platform.open(guild_id, channel_id).await?;

        // The previous connection is not closed here, only forgotten.
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            previous.detach(&self.platform).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.platform.observe(&connection, tx).await;
        let connection_listener = tokio::spawn(log_connection_events(rx));

        let ready = match tokio::time::timeout(self.ready_timeout, ready).await {
            Ok(ready) => ready,
            Err(_) => Err(anyhow!(
                "voice connection was not ready within {}",
                humantime::format_duration(self.ready_timeout)
            )),
        };
        if let Err(e) = ready {
            connection_listener.abort();
            self.platform.detach(&connection).await;
            return Err(e);
        }
        info!(%guild_id, %channel_id, "Successfully joined voice channel");

        let player_listener = PlaybackController::spawn(
            Arc::clone(&self.platform),
            Arc::clone(&self.settings),
            connection.clone(),
        )
        .await;

        let session = Session {
            guild_id,
            channel_id,
            connection: connection.clone(),
            listeners: vec![connection_listener, player_listener],
        };
        // Set by an establish that overlapped this one.
        let replaced = self.session.lock().await.replace(session);
        match replaced {
            Some(replaced) if replaced.connection == connection => replaced.abort_listeners(),
            Some(replaced) => replaced.detach(&self.platform).await,
            None => {}
        }

        Ok(())
    }

    /// Destroys the active session, if any.
    #[tracing::instrument(skip(self))]
    pub async fn stop_playback(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = self.platform.destroy(&session.connection).await {
                error!("Error leaving voice channel: {e:?}");
            }
            session.detach(&self.platform).await;
        }
    }

    pub async fn active_target(&self) -> Option<(GuildId, ChannelId)> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| (s.guild_id, s.channel_id))
    }

    pub async fn active_connection(&self) -> Option<P::Connection> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.connection.clone())
    }
}

async fn log_connection_events(mut rx: UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Error(e) => error!("Voice connection error: {e}"),
            ConnectionEvent::Disconnected => info!("Disconnected from voice channel"),
            ConnectionEvent::Reconnected => info!("Reconnected to voice channel"),
        }
    }
}
