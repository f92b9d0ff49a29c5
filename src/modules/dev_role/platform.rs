use crate::modules::dev_role::snapshot::InviteUse;
use crate::Error;
use poise::serenity_prelude as serenity;
use std::future::Future;

const GRANT_REASON: &str = "Joined through the dev channel invite";

/// The Discord calls the join tracking depends on.
pub trait Platform: Sync {
    fn list_invites(
        &self,
        guild_id: serenity::GuildId,
    ) -> impl Future<Output = Result<Vec<InviteUse>, Error>> + Send;

    fn grant_role(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        role_id: serenity::RoleId,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Talks to Discord over the REST client of the running bot.
pub struct HttpPlatform<'a> {
    http: &'a serenity::Http,
}

impl<'a> HttpPlatform<'a> {
    pub fn new(http: &'a serenity::Http) -> Self {
        Self { http }
    }
}

impl Platform for HttpPlatform<'_> {
    async fn list_invites(&self, guild_id: serenity::GuildId) -> Result<Vec<InviteUse>, Error> {
        let invites = guild_id.invites(self.http).await?;
        Ok(invites.iter().map(InviteUse::from).collect())
    }

    async fn grant_role(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        role_id: serenity::RoleId,
    ) -> Result<(), Error> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(GRANT_REASON))
            .await?;
        Ok(())
    }
}

/// Resolve the configured dev channel to the server it belongs to.
pub async fn resolve_dev_guild(
    ctx: &serenity::Context,
    dev_channel: serenity::ChannelId,
) -> Result<serenity::GuildId, Error> {
    let channel = dev_channel.to_channel(ctx).await?;
    match channel.guild() {
        Some(channel) => Ok(channel.guild_id),
        None => anyhow::bail!("dev channel {} is not a server channel", dev_channel),
    }
}

/// Whether the dev role still exists in the tracked server.
pub async fn dev_role_exists(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    dev_role: serenity::RoleId,
) -> Result<bool, Error> {
    let roles = guild_id.roles(&ctx.http).await?;
    Ok(roles.contains_key(&dev_role))
}
