pub mod commands;
pub mod events;
pub mod platform;
pub mod snapshot;
pub mod tracking;

use crate::modules::{Module, ModuleDefinition};

pub const DEFINITION: ModuleDefinition = ModuleDefinition {
    id: "dev_role",
    name: "Dev role",
    description: "Gives the dev role to members who joined through a dev channel invite",
};

pub fn module() -> Module {
    Module {
        definition: DEFINITION,
        commands: commands::commands(),
        event_handlers: vec![events::handler],
    }
}
