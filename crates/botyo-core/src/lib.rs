//! Core of the Botyo chat bot host.
//!
//! Framework-agnostic: the chat transport lives behind [`chat::ChatApi`],
//! implemented in adapter crates.

pub mod bot;
pub mod builtin;
pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod history;
pub mod logging;
pub mod module;
pub mod participants;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod threads;

#[cfg(test)]
pub(crate) mod test_support;

pub use bot::{Bot, BotBuilder};
pub use errors::{Error, Result};
pub use module::{
    CommandErrorHandler, CommandModule, CommandNames, FilterModule, Module, ModuleContext,
    ModuleKind, ScheduledTaskModule,
};
