use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info};

/// Framework-level event hook: logs lifecycle events and hands every event to
/// each module's handlers in turn.
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            info!(
                "Logged in as {}, {}, profile: {:?}",
                data_about_bot.user.name, data_about_bot.user.id, data.profile
            );
        }
        serenity::FullEvent::GuildCreate { guild, is_new } => {
            if is_new.unwrap_or(false) {
                info!("Joined new guild: {} ({})", guild.name, guild.id);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            info!("Left guild: {}", incomplete.id);
        }
        _ => {}
    }

    for module in &data.modules {
        for handler in &module.handlers {
            if let Err(e) = handler(ctx, event, data).await {
                error!(
                    "Error in event handler for module {} on {}: {:?}",
                    module.id,
                    event.snake_case_name(),
                    e
                );
            }
        }
    }

    Ok(())
}

pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => {
            error!("Failed to set up the framework: {:?}", error);
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
            if let Err(e) = ctx.say("Something went wrong, see the bot logs.").await {
                error!("Failed to report command error: {:?}", e);
            }
        }
        poise::FrameworkError::EventHandler { error, event, .. } => {
            error!("Error handling {}: {:?}", event.snake_case_name(), error);
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}
