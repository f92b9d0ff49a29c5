use crate::modules::dev_role::platform::HttpPlatform;
use crate::modules::dev_role::snapshot::InviteSnapshot;
use crate::modules::dev_role::tracking::DevRoleSession;
use crate::{Context, Data, Error};
use poise::serenity_prelude as serenity;

pub fn commands() -> Vec<poise::Command<Data, Error>> {
    vec![devrole()]
}

/// Dev role invite tracking
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "MANAGE_ROLES",
    subcommands("status", "refresh"),
    subcommand_required
)]
pub async fn devrole(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the tracked invite counters
#[poise::command(
    slash_command,
    guild_only,
    ephemeral,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let session = &ctx.data().dev_role;
    let counts = session.counts();

    let mut embed = serenity::CreateEmbed::new()
        .title("Dev role tracking")
        .colour(serenity::Colour::new(0x3498db))
        .field("Dev channel", format!("<#{}>", session.dev_channel()), true)
        .field("Dev role", format!("<@&{}>", session.dev_role()), true);

    embed = match session.tracked().await {
        Some(tracked) => embed
            .field("Tracked server", tracked.guild_id.to_string(), true)
            .field("Invite uses", describe(session, &tracked.snapshot), false)
            .field(
                "Snapshot taken",
                format!("<t:{}:R>", tracked.taken_at.timestamp()),
                true,
            ),
        None => embed.field("Tracked server", "Not tracking yet", true),
    };

    embed = embed.field(
        "Joins",
        format!(
            "{} seen, {} granted, {} failed grants, {} failed refreshes",
            counts.joins, counts.granted, counts.grant_failures, counts.refresh_failures
        ),
        false,
    );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Re-read the invite counters, e.g. after invites were deleted
#[poise::command(
    slash_command,
    guild_only,
    ephemeral,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn refresh(ctx: Context<'_>) -> Result<(), Error> {
    let session = &ctx.data().dev_role;

    if let Some(tracked) = session.tracked().await {
        if ctx.guild_id() != Some(tracked.guild_id) {
            ctx.say("This server is not the one being tracked.").await?;
            return Ok(());
        }
    }

    let platform = HttpPlatform::new(ctx.http());
    let response = match session.resync(&platform).await? {
        Some((previous, current)) => format!(
            "Invite counters refreshed.\nBefore: {}\nNow: {}",
            describe(session, &previous),
            describe(session, &current)
        ),
        None => "Invites are not tracked yet, wait for the bot to be ready.".to_string(),
    };

    ctx.say(response).await?;
    Ok(())
}

fn describe(session: &DevRoleSession, snapshot: &InviteSnapshot) -> String {
    format!(
        "{} uses, {} through the dev channel",
        snapshot.total_uses(),
        snapshot.uses_in(session.dev_channel())
    )
}
