pub mod dev_role;

use crate::{Data, Error};
use poise::serenity_prelude as serenity;

pub type EventHandler = for<'a> fn(
    &'a serenity::Context,
    &'a serenity::FullEvent,
    &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>>;

#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub struct Module {
    pub definition: ModuleDefinition,
    pub commands: Vec<poise::Command<Data, Error>>,
    pub event_handlers: Vec<EventHandler>,
}

/// The event side of a module, kept in the framework data.
pub struct ModuleEvents {
    pub id: &'static str,
    pub handlers: Vec<EventHandler>,
}

pub fn get_modules() -> Vec<Module> {
    vec![dev_role::module()]
}

pub fn commands() -> Vec<poise::Command<Data, Error>> {
    let mut all_commands = vec![];

    for mut module in get_modules() {
        let category = module.definition.id;
        for command in &mut module.commands {
            command.category = Some(category.into());
        }
        all_commands.extend(module.commands);
    }

    all_commands
}

pub fn events() -> Vec<ModuleEvents> {
    get_modules()
        .into_iter()
        .map(|m| ModuleEvents {
            id: m.definition.id,
            handlers: m.event_handlers,
        })
        .collect()
}
