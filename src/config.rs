use std::{
    fmt, fs,
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use parking_lot::RwLock;
use serde::{de, Deserialize, Deserializer, Serialize};
use serenity::model::id::{ChannelId, GuildId, UserId};

static DEFAULT_BUFFERING_TIMEOUT: Duration = Duration::from_millis(5000);

/// The persisted bot settings.
///
/// Every field is optional at rest. Playback needs the guild, the channel and
/// the stream link; a missing one is logged where it is needed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(
        default,
        deserialize_with = "optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<UserId>,

    #[serde(
        default,
        deserialize_with = "optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub guild_id: Option<GuildId>,

    #[serde(
        default,
        deserialize_with = "optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<ChannelId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_link: Option<String>,

    /// Milliseconds a stream may spend buffering before it is restarted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffering_timeout: Option<u64>,
}

impl Settings {
    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_id == Some(user_id)
    }

    /// Returns the guild and voice channel to join, if both are configured.
    pub fn target(&self) -> Option<(GuildId, ChannelId)> {
        Some((self.guild_id?, self.channel_id?))
    }

    pub fn buffering_timeout(&self) -> Duration {
        self.buffering_timeout
            .map_or(DEFAULT_BUFFERING_TIMEOUT, Duration::from_millis)
    }

    /// Picks the bot token, preferring one given on the command line or in
    /// the environment over the settings file.
    pub fn resolve_token(&self, override_token: Option<String>) -> anyhow::Result<String> {
        override_token
            .or_else(|| self.token.clone())
            .filter(|t| !t.is_empty())
            .context("No Discord token in the settings file or the environment")
    }

    /// Returns the stream link, treating an empty string as unset.
    pub fn stream_link(&self) -> Option<&str> {
        self.stream_link.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Reads an id stored as a decimal string or a number. Blank strings and zero
/// mean the id is not configured.
fn optional_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<NonZeroU64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    let id = match Option::<RawId>::deserialize(deserializer)? {
        None => None,
        Some(RawId::Number(n)) => NonZeroU64::new(n),
        Some(RawId::Text(s)) if s.trim().is_empty() => None,
        Some(RawId::Text(s)) => {
            let n = s
                .trim()
                .parse::<u64>()
                .map_err(|e| de::Error::custom(format!("invalid id {s:?}: {e}")))?;
            NonZeroU64::new(n)
        }
    };
    Ok(id.map(T::from))
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("owner_id", &self.owner_id)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("stream_link", &self.stream_link)
            .field("buffering_timeout", &self.buffering_timeout)
            .finish()
    }
}

/// [`Settings`] bound to the file they were loaded from.
///
/// Every mutation goes through [`SettingsStore::update`], which rewrites the
/// whole file.
#[derive(Debug)]
pub struct SettingsStore {
    settings: Settings,
    config_file: PathBuf,
}

pub type SharedSettings = Arc<RwLock<SettingsStore>>;

impl SettingsStore {
    pub fn load<P: AsRef<Path>>(config_file: P) -> anyhow::Result<Self> {
        let config_file = config_file.as_ref();
        let j = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read {}", config_file.display()))?;
        let settings = serde_json::from_str(&j)
            .with_context(|| format!("Failed to parse {}", config_file.display()))?;
        Ok(Self {
            settings,
            config_file: config_file.into(),
        })
    }

    pub fn new<P: AsRef<Path>>(config_file: P, settings: Settings) -> Self {
        Self {
            settings,
            config_file: config_file.as_ref().into(),
        }
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let j = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.config_file, j)
            .with_context(|| format!("Failed to write {}", self.config_file.display()))?;
        Ok(())
    }

    /// Applies `f` to the settings and persists the result.
    pub fn update<F>(&mut self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        f(&mut self.settings);
        self.save()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Settings {
        Settings {
            token: Some("secret".into()),
            owner_id: Some(UserId::new(310620137608970240)),
            guild_id: Some(GuildId::new(1000)),
            channel_id: Some(ChannelId::new(2000)),
            stream_link: Some("https://radio.example/stream.mp3".into()),
            buffering_timeout: Some(15000),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        SettingsStore::new(&path, sample()).save().unwrap();

        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(loaded.settings(), &sample());
    }

    #[test]
    fn test_load_existing_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
  "token": "secret",
  "ownerId": "310620137608970240",
  "guildId": "1000",
  "channelId": "2000",
  "streamLink": "https://radio.example/stream.mp3",
  "bufferingTimeout": 15000
}"#,
        )
        .unwrap();

        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(loaded.settings(), &sample());
    }

    #[test]
    fn test_load_partial_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{"token": "secret"}"#).unwrap();
        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(loaded.settings().target(), None);
        assert_eq!(loaded.settings().stream_link(), None);
        assert_eq!(
            loaded.settings().buffering_timeout(),
            DEFAULT_BUFFERING_TIMEOUT
        );

        fs::write(&path, "{ not json").unwrap();
        assert!(SettingsStore::load(&path).is_err());
        assert!(SettingsStore::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_load_empty_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"token": "secret", "ownerId": "0", "guildId": "", "channelId": null}"#,
        )
        .unwrap();

        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(loaded.settings().owner_id, None);
        assert_eq!(loaded.settings().guild_id, None);
        assert_eq!(loaded.settings().target(), None);

        fs::write(&path, r#"{"guildId": 1000, "channelId": " 2000 "}"#).unwrap();
        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(
            loaded.settings().target(),
            Some((GuildId::new(1000), ChannelId::new(2000)))
        );

        fs::write(&path, r#"{"guildId": "general"}"#).unwrap();
        assert!(SettingsStore::load(&path).is_err());
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = SettingsStore::new(&path, sample());

        store
            .update(|s| s.stream_link = Some("https://other.example/live".into()))
            .unwrap();

        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(
            loaded.settings().stream_link(),
            Some("https://other.example/live")
        );
        assert_eq!(loaded.settings().channel_id, sample().channel_id);
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_resolve_token() {
        let settings = sample();
        assert_eq!(settings.resolve_token(None).unwrap(), "secret");
        assert_eq!(
            settings.resolve_token(Some("from-env".into())).unwrap(),
            "from-env"
        );
        assert!(Settings::default().resolve_token(None).is_err());
    }

    #[test]
    fn test_empty_stream_link_is_unset() {
        let settings = Settings {
            stream_link: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(settings.stream_link(), None);
    }
}
