// Discord adapters for the protection engine.

pub mod announcer;
pub mod commands;
pub mod events;
pub mod formatter;
pub mod punisher;
