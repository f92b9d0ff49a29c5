use crate::Error;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::fmt;
use tracing::level_filters::LevelFilter;

/// Which set of environment variables and log settings to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Debug,
    Production,
}

impl Profile {
    fn key(&self, name: &str) -> String {
        match self {
            Profile::Debug => format!("{}_DEBUG", name),
            Profile::Production => name.to_string(),
        }
    }

    pub fn log_file_name(&self) -> &'static str {
        match self {
            Profile::Debug => "discord_debug.log",
            Profile::Production => "discord.log",
        }
    }

    pub fn console_level(&self) -> LevelFilter {
        match self {
            Profile::Debug => LevelFilter::DEBUG,
            Profile::Production => LevelFilter::INFO,
        }
    }
}

pub struct BotConfig {
    pub profile: Profile,
    pub dev_channel: serenity::ChannelId,
    pub dev_role: serenity::RoleId,
    pub token: String,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("profile", &self.profile)
            .field("dev_channel", &self.dev_channel)
            .field("dev_role", &self.dev_role)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl BotConfig {
    pub fn from_env(profile: Profile) -> Result<Self, Error> {
        Self::from_lookup(profile, |key| std::env::var(key).ok())
    }

    fn from_lookup(profile: Profile, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str| {
            let key = profile.key(name);
            lookup(&key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
                .map(|value| (key, value))
        };

        let id = |name: &str| -> Result<u64, Error> {
            let (key, value) = var(name)?;
            match value.trim().parse::<u64>() {
                Ok(0) => anyhow::bail!("{} must not be 0", key),
                Ok(id) => Ok(id),
                Err(e) => Err(e).with_context(|| format!("{} is not a valid id: {:?}", key, value)),
            }
        };

        Ok(Self {
            profile,
            dev_channel: serenity::ChannelId::new(id("DEV_CHANNEL")?),
            dev_role: serenity::RoleId::new(id("DEV_ROLE")?),
            token: var("TOKEN")?.1,
        })
    }
}
