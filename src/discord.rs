use std::{sync::Arc, time::Duration};

use serenity::{
    all::{ActivityData, ChannelType, OnlineStatus},
    async_trait,
    client::Context,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    events::{Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent},
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, CoreEvent, Songbird,
};
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tracing::{error, warn};

use crate::{
    play::{PlayerEvent, PlayerStatus, StreamSource, StreamingActivity},
    voice::{ConnectionEvent, LookupError, Platform, Ready},
};

/// [`Platform`] backed by the serenity cache and a songbird voice manager.
pub struct DiscordPlatform {
    ctx: Context,
    songbird: Arc<Songbird>,
    http: reqwest::Client,
}

impl DiscordPlatform {
    pub fn new(ctx: Context, songbird: Arc<Songbird>) -> Self {
        Self {
            ctx,
            songbird,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Clone)]
pub struct DiscordConnection {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

/// Songbird keeps one call per guild; connections to it are the same call.
impl PartialEq for DiscordConnection {
    fn eq(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id && Arc::ptr_eq(&self.call, &other.call)
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    type Connection = DiscordConnection;

    fn resolve_voice_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), LookupError> {
        let guild = self
            .ctx
            .cache
            .guild(guild_id)
            .ok_or(LookupError::GuildNotFound(guild_id))?;
        let channel = guild
            .channels
            .get(&channel_id)
            .ok_or(LookupError::ChannelNotFound(channel_id))?;
        match channel.kind {
            ChannelType::Voice | ChannelType::Stage => Ok(()),
            _ => Err(LookupError::NotVoice(channel_id)),
        }
    }

    async fn open(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> anyhow::Result<(DiscordConnection, Ready)> {
        let call = self.songbird.get_or_insert(guild_id);
        // The join future must be awaited after the lock on the call is released.
        let join = call.lock().await.join(channel_id).await?;
        let ready: Ready = Box::pin(async move { join.await.map_err(anyhow::Error::from) });
        Ok((DiscordConnection { guild_id, call }, ready))
    }

    async fn observe(&self, connection: &DiscordConnection, events: UnboundedSender<ConnectionEvent>) {
        let mut call = connection.call.lock().await;
        call.add_global_event(
            CoreEvent::DriverDisconnect.into(),
            ConnectionObserver(events.clone()),
        );
        call.add_global_event(CoreEvent::DriverReconnect.into(), ConnectionObserver(events));
    }

    async fn detach(&self, connection: &DiscordConnection) {
        connection.call.lock().await.remove_all_global_events();
    }

    async fn destroy(&self, connection: &DiscordConnection) -> anyhow::Result<()> {
        self.songbird.remove(connection.guild_id).await?;
        Ok(())
    }

    async fn play(
        &self,
        connection: &DiscordConnection,
        source: StreamSource,
        events: UnboundedSender<PlayerEvent>,
    ) -> anyhow::Result<()> {
        let input = HttpRequest::new(self.http.clone(), source.url);
        let track = connection.call.lock().await.play_only_input(input.into());

        for (event, status) in [
            (TrackEvent::Preparing, PlayerStatus::Buffering),
            (TrackEvent::Play, PlayerStatus::Playing),
            (TrackEvent::Pause, PlayerStatus::Paused),
            (TrackEvent::End, PlayerStatus::Idle),
        ] {
            track.add_event(
                Event::Track(event),
                TrackObserver {
                    events: events.clone(),
                    status,
                },
            )?;
        }
        track.add_event(Event::Track(TrackEvent::Error), TrackErrorObserver(events))?;

        tokio::spawn(enforce_buffering_timeout(track, source.buffering_timeout));
        Ok(())
    }

    fn set_streaming_presence(&self, activity: &StreamingActivity) {
        match ActivityData::streaming(activity.name, activity.url) {
            Ok(data) => self.ctx.set_presence(Some(data), OnlineStatus::Idle),
            Err(e) => error!("Invalid streaming url {}: {e}", activity.url),
        }
    }
}

/// Stops the track if it is not playable within `timeout`; the resulting end
/// event makes the player start the stream again.
async fn enforce_buffering_timeout(track: TrackHandle, timeout: Duration) {
    if tokio::time::timeout(timeout, track.make_playable_async())
        .await
        .is_err()
    {
        warn!(
            "Stream was not playable within {}, restarting it",
            humantime::format_duration(timeout)
        );
        track.stop().ok();
    }
}

struct ConnectionObserver(UnboundedSender<ConnectionEvent>);

#[async_trait]
impl VoiceEventHandler for ConnectionObserver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverDisconnect(data) => {
                if let Some(reason) = &data.reason {
                    self.0.send(ConnectionEvent::Error(format!("{reason:?}"))).ok();
                }
                self.0.send(ConnectionEvent::Disconnected).ok();
            }
            EventContext::DriverReconnect(_) => {
                self.0.send(ConnectionEvent::Reconnected).ok();
            }
            _ => {}
        }
        None
    }
}

struct TrackObserver {
    events: UnboundedSender<PlayerEvent>,
    status: PlayerStatus,
}

#[async_trait]
impl VoiceEventHandler for TrackObserver {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.events.send(PlayerEvent::Transition(self.status)).ok();
        None
    }
}

/// Songbird does not end errored tracks, so an error is also reported as the
/// player going idle.
struct TrackErrorObserver(UnboundedSender<PlayerEvent>);

#[async_trait]
impl VoiceEventHandler for TrackErrorObserver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let PlayMode::Errored(e) = &state.playing {
                    self.0.send(PlayerEvent::Error(format!("{e:?}"))).ok();
                }
            }
        }
        self.0
            .send(PlayerEvent::Transition(PlayerStatus::Idle))
            .ok();
        None
    }
}
