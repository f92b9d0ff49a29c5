pub mod config;
pub mod event_manager;
pub mod logging;
