//! A recording [`Platform`] for unit tests.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use anyhow::bail;
use parking_lot::Mutex;
use serenity::{
    async_trait,
    model::id::{ChannelId, GuildId},
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    play::{PlayerEvent, StreamSource, StreamingActivity},
    voice::{ConnectionEvent, LookupError, Platform, Ready},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Open(u64),
    Observe(u64),
    Detach(u64),
    Destroy(u64),
    Play(u64, StreamSource),
    Presence(&'static str, &'static str),
}

#[derive(Default)]
pub struct FakePlatform {
    // guild -> channel -> is voice
    guilds: HashMap<GuildId, HashMap<ChannelId, bool>>,
    calls: Mutex<Vec<FakeCall>>,
    next_connection: AtomicU64,
    never_ready: AtomicBool,
    fail_open: AtomicBool,
    // Every open returns connection 1, like songbird's one call per guild.
    shared_connection: AtomicBool,
    ready_delay: Mutex<Duration>,
    player_events: Mutex<Option<UnboundedSender<PlayerEvent>>>,
}

impl FakePlatform {
    pub fn with_channels(guild_id: GuildId, voice: &[ChannelId], text: &[ChannelId]) -> Self {
        let channels = voice
            .iter()
            .map(|c| (*c, true))
            .chain(text.iter().map(|c| (*c, false)))
            .collect();
        Self {
            guilds: HashMap::from([(guild_id, channels)]),
            ..Default::default()
        }
    }

    pub fn set_never_ready(&self, value: bool) {
        self.never_ready.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, value: bool) {
        self.fail_open.store(value, Ordering::SeqCst);
    }

    pub fn set_shared_connection(&self, value: bool) {
        self.shared_connection.store(value, Ordering::SeqCst);
    }

    pub fn set_ready_delay(&self, delay: Duration) {
        *self.ready_delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    pub fn plays(&self) -> Vec<(u64, StreamSource)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                FakeCall::Play(connection, source) => Some((*connection, source.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sends `event` as if the most recently started player emitted it.
    pub fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = self.player_events.lock().as_ref() {
            tx.send(event).ok();
        }
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    type Connection = u64;

    fn resolve_voice_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), LookupError> {
        let channels = self
            .guilds
            .get(&guild_id)
            .ok_or(LookupError::GuildNotFound(guild_id))?;
        match channels.get(&channel_id) {
            Some(true) => Ok(()),
            Some(false) => Err(LookupError::NotVoice(channel_id)),
            None => Err(LookupError::ChannelNotFound(channel_id)),
        }
    }

    async fn open(&self, _guild_id: GuildId, _channel_id: ChannelId) -> anyhow::Result<(u64, Ready)> {
        if self.fail_open.load(Ordering::SeqCst) {
            bail!("gateway refused the voice state update");
        }
        let connection = if self.shared_connection.load(Ordering::SeqCst) {
            1
        } else {
            self.next_connection.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.record(FakeCall::Open(connection));
        let delay = *self.ready_delay.lock();
        let ready: Ready = if self.never_ready.load(Ordering::SeqCst) {
            Box::pin(std::future::pending::<anyhow::Result<()>>())
        } else {
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                anyhow::Ok(())
            })
        };
        Ok((connection, ready))
    }

    async fn observe(&self, connection: &u64, _events: UnboundedSender<ConnectionEvent>) {
        self.record(FakeCall::Observe(*connection));
    }

    async fn detach(&self, connection: &u64) {
        self.record(FakeCall::Detach(*connection));
    }

    async fn destroy(&self, connection: &u64) -> anyhow::Result<()> {
        self.record(FakeCall::Destroy(*connection));
        Ok(())
    }

    async fn play(
        &self,
        connection: &u64,
        source: StreamSource,
        events: UnboundedSender<PlayerEvent>,
    ) -> anyhow::Result<()> {
        self.record(FakeCall::Play(*connection, source));
        *self.player_events.lock() = Some(events);
        Ok(())
    }

    fn set_streaming_presence(&self, activity: &StreamingActivity) {
        self.record(FakeCall::Presence(activity.name, activity.url));
    }
}

/// Polls `condition` until it holds, failing the test after a second.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .expect("condition was not met in time");
}
