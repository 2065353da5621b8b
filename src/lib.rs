pub mod command;
pub mod config;
pub mod core;
pub mod discord;
pub mod play;
pub mod voice;

#[cfg(test)]
mod testing;

pub use crate::{
    config::{Settings, SettingsStore, SharedSettings},
    core::{format_uptime, Radio, RadioCommand, RECONCILE_INTERVAL},
    discord::DiscordPlatform,
    play::{PlaybackController, PlayerEvent, PlayerStatus},
    voice::{Platform, SessionManager},
};
