use crate::modules::dev_role::platform::{self, HttpPlatform};
use crate::modules::dev_role::tracking::JoinEvent;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{debug, error, warn};

pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move { handle_event(ctx, event, data).await })
}

async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { .. } => {
            handle_ready(ctx, data).await;
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            handle_member_join(ctx, new_member, data).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_ready(ctx: &serenity::Context, data: &Data) {
    let session = &data.dev_role;

    let guild_id = match platform::resolve_dev_guild(ctx, session.dev_channel()).await {
        Ok(id) => id,
        Err(e) => {
            error!(
                "Could not resolve dev channel {}, joins will not be attributed: {:?}",
                session.dev_channel(),
                e
            );
            return;
        }
    };

    match platform::dev_role_exists(ctx, guild_id, session.dev_role()).await {
        Ok(true) => debug!("role dev fetched: {}", session.dev_role()),
        Ok(false) => warn!(
            "Dev role {} does not exist in guild {}",
            session.dev_role(),
            guild_id
        ),
        Err(e) => warn!("Failed to fetch roles of guild {}: {:?}", guild_id, e),
    }

    let platform = HttpPlatform::new(&ctx.http);
    if let Err(e) = session.initialize(&platform, guild_id).await {
        error!("Failed to take initial invite snapshot: {:?}", e);
    }
}

async fn handle_member_join(
    ctx: &serenity::Context,
    member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    let platform = HttpPlatform::new(&ctx.http);
    let outcome = data
        .dev_role
        .handle_member_join(&platform, &JoinEvent::from(member))
        .await?;

    debug!("Join of {} handled: {:?}", member.user.id, outcome);
    Ok(())
}
