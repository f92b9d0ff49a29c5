use anyhow::Context as _;
use clap::Parser as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use std::path::PathBuf;
use tracing::{error, info};

mod modules;
mod services;

use services::config::{BotConfig, Profile};

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use the production environment variables and log level.
    #[arg(long)]
    production: bool,

    /// Directory the log file is written to.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Publish commands. If no guild ID is provided, publish globally.
    #[arg(long, num_args = 0..)]
    publish: Option<Vec<u64>>,

    /// Clear all commands instead of publishing them.
    #[arg(long, requires = "publish")]
    clear: bool,
}

// Custom user data passed to all command functions
pub struct Data {
    pub profile: Profile,
    pub dev_role: modules::dev_role::tracking::DevRoleSession,
    pub modules: Vec<modules::ModuleEvents>,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let profile = if args.production {
        Profile::Production
    } else {
        Profile::Debug
    };

    let config = BotConfig::from_env(profile).context("Invalid configuration")?;

    let _log_guard =
        services::logging::init(profile, &args.log_dir).context("Failed to initialize logging")?;

    info!("{}", "#".repeat(80));
    info!("Starting dev role bot with {:?}", config);

    let framework_options = poise::FrameworkOptions {
        commands: modules::commands(),
        event_handler: |ctx, event, framework, data| {
            Box::pin(services::event_manager::event_handler(ctx, event, framework, data))
        },
        on_error: |error| Box::pin(services::event_manager::on_error(error)),
        ..Default::default()
    };

    if let Some(guild_ids) = args.publish {
        publish_commands(&config.token, &framework_options.commands, &guild_ids, args.clear).await?;
        return Ok(());
    }

    let modules = modules::events();
    for definition in modules::get_modules().into_iter().map(|m| m.definition) {
        info!("Loaded module {}: {}", definition.name, definition.description);
    }

    let dev_channel = config.dev_channel;
    let dev_role = config.dev_role;
    let framework = poise::Framework::builder()
        .options(framework_options)
        .setup(move |_ctx, _ready, _framework| {
            Box::pin(async move {
                Ok(Data {
                    profile,
                    dev_role: modules::dev_role::tracking::DevRoleSession::new(
                        dev_channel,
                        dev_role,
                    ),
                    modules,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_INVITES;

    let mut client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await
        .context("Failed to create client")?;

    client.start().await.context("Client error")?;

    Ok(())
}

async fn publish_commands(
    token: &str,
    commands: &[poise::Command<Data, Error>],
    guild_ids: &[u64],
    clear: bool,
) -> Result<(), Error> {
    let http = serenity::Http::new(token);
    let bot_user = http
        .get_current_user()
        .await
        .context("Failed to fetch bot user info")?;
    http.set_application_id(serenity::ApplicationId::new(bot_user.id.get()));
    info!("Fetched Application ID: {}", bot_user.id);

    let commands: &[poise::Command<Data, Error>] = if clear { &[] } else { commands };

    if guild_ids.is_empty() {
        info!("Publishing {} commands globally...", commands.len());
        if let Err(e) = poise::builtins::register_globally(&http, commands).await {
            error!("Failed to register commands globally: {}", e);
        }
        return Ok(());
    }

    for &guild_id in guild_ids {
        info!("Publishing {} commands in guild {}...", commands.len(), guild_id);
        if let Err(e) =
            poise::builtins::register_in_guild(&http, commands, serenity::GuildId::new(guild_id))
                .await
        {
            error!("Failed to register commands in guild {}: {}", guild_id, e);
        }
    }

    Ok(())
}
