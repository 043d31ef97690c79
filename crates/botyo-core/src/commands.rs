//! Per-thread command table and the prefix / command-name routines shared by
//! the router and the help command.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    chat::Message,
    config::CONFIG_KEY_CHAT_THREADS,
    context::{ContextResolver, Scope},
    domain::ThreadId,
    errors::Error,
    module::CommandModule,
    registry::validate_command_name,
    Result,
};

/// Name of the router module; its configuration holds the prefix.
pub const COMMAND_ROUTER: &str = "CommandRouter";
pub const CONFIG_KEY_PREFIX: &str = "prefix";
pub const CONFIG_KEY_COMMAND: &str = "command";
pub const CONFIG_KEY_HIDDEN: &str = "hidden";
pub const DEFAULT_PREFIX: &str = "#";

#[derive(Default)]
struct ThreadCommands {
    by_name: HashMap<String, Arc<dyn CommandModule>>,
    /// Module name -> names it answers to in this thread.
    names_by_module: HashMap<String, Vec<String>>,
}

pub struct CommandManager {
    resolver: ContextResolver,
    modules: Vec<Arc<dyn CommandModule>>,
    tables: RwLock<HashMap<ThreadId, ThreadCommands>>,
}

impl CommandManager {
    pub fn new(resolver: ContextResolver, modules: Vec<Arc<dyn CommandModule>>) -> Self {
        Self {
            resolver,
            modules,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Command modules in registration order.
    pub fn modules(&self) -> &[Arc<dyn CommandModule>] {
        &self.modules
    }

    /// Build the command table of every configured chat thread. Invalid or
    /// duplicate names are configuration errors.
    pub fn populate(&self) -> Result<()> {
        let threads = self.resolver.store().with_raw(|root| {
            root.get(CONFIG_KEY_CHAT_THREADS)
                .and_then(Value::as_object)
                .map(|m| m.keys().map(|k| ThreadId::new(k.as_str())).collect::<Vec<_>>())
                .unwrap_or_default()
        });

        let mut tables = HashMap::with_capacity(threads.len());
        for thread in threads {
            let table = self.build_table(&thread)?;
            tracing::debug!(thread = %thread, commands = table.by_name.len(), "command table populated");
            tables.insert(thread, table);
        }
        *self.tables.write() = tables;
        Ok(())
    }

    fn build_table(&self, thread: &ThreadId) -> Result<ThreadCommands> {
        let mut table = ThreadCommands::default();
        for module in &self.modules {
            let names = self.command_names_in_thread(module.as_ref(), thread)?;
            for name in &names {
                validate_command_name(module.name(), name, Some(thread))?;
                if let Some(existing) = table.by_name.get(name) {
                    return Err(Error::DuplicateCommand {
                        command: name.clone(),
                        thread: Some(thread.to_string()),
                        existing: existing.name().to_string(),
                        attempted: module.name().to_string(),
                    });
                }
                table.by_name.insert(name.clone(), module.clone());
            }
            table
                .names_by_module
                .insert(module.name().to_string(), names);
        }
        Ok(table)
    }

    /// Names `module` answers to in `thread`: its `command` override when
    /// present, otherwise its default names.
    pub fn command_names_in_thread(
        &self,
        module: &dyn CommandModule,
        thread: &ThreadId,
    ) -> Result<Vec<String>> {
        let scoped = self
            .resolver
            .scoped(module.name(), &Scope::ChatThread(thread.clone()));
        let shape_error = || {
            Error::Config(format!(
                "command override of module '{}' must be a string or a non-empty list of strings",
                module.name()
            ))
        };

        match scoped.raw().get(CONFIG_KEY_COMMAND) {
            None | Some(Value::Null) => Ok(module.command().names().to_vec()),
            Some(Value::String(name)) => Ok(vec![name.clone()]),
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(shape_error))
                .collect(),
            Some(_) => Err(shape_error()),
        }
    }

    /// The handler of `name` in `thread`, if any.
    pub fn command(&self, thread: &ThreadId, name: &str) -> Option<Arc<dyn CommandModule>> {
        self.tables
            .read()
            .get(thread)
            .and_then(|t| t.by_name.get(name).cloned())
    }

    /// First name `module` answers to in `thread`.
    pub fn primary_name(&self, module: &dyn CommandModule, thread: &ThreadId) -> Option<String> {
        let from_table = self
            .tables
            .read()
            .get(thread)
            .and_then(|t| t.names_by_module.get(module.name()))
            .and_then(|names| names.first().cloned());
        from_table.or_else(|| module.command().primary().map(str::to_string))
    }

    /// Command prefix of the message's chat thread.
    pub fn prefix_of_context(&self, thread: &ThreadId) -> String {
        self.resolver
            .scoped(COMMAND_ROUTER, &Scope::ChatThread(thread.clone()))
            .get_or_else(CONFIG_KEY_PREFIX, DEFAULT_PREFIX.to_string())
            .unwrap_or_else(|e| {
                tracing::warn!(thread = %thread, "falling back to default prefix: {e}");
                DEFAULT_PREFIX.to_string()
            })
    }

    /// First whitespace-delimited token of the body with the prefix stripped.
    /// `None` when the token does not start with the prefix.
    pub fn command_name_from_message(&self, msg: &Message) -> Option<String> {
        let prefix = self.prefix_of_context(&msg.thread_id);
        let token = msg.body.split_whitespace().next()?;
        token.strip_prefix(prefix.as_str()).map(str::to_string)
    }

    /// Everything after the command token, trimmed.
    pub fn args_from_message(&self, msg: &Message) -> String {
        let body = msg.body.trim_start();
        match body.find(char::is_whitespace) {
            Some(idx) => body[idx..].trim().to_string(),
            None => String::new(),
        }
    }

    pub fn make_help_text(&self, prefix: &str, command_name: &str, module: &dyn CommandModule) -> String {
        format!(
            "\u{2139} {prefix}{command_name} - {}\n\u{1F527} Usage: {prefix}{command_name} {}",
            module.description(),
            module.usage()
        )
        .trim_end()
        .to_string()
    }

    pub fn is_enabled_in_context(&self, module: &dyn CommandModule, msg: &Message) -> bool {
        self.resolver
            .is_enabled(module.name(), &msg.thread_id, Some(&msg.sender_id))
    }

    pub fn is_hidden_in_context(&self, module: &dyn CommandModule, msg: &Message) -> bool {
        self.resolver
            .resolve_or_else(
                module.name(),
                &msg.thread_id,
                Some(&msg.sender_id),
                CONFIG_KEY_HIDDEN,
                false,
            )
            .unwrap_or(false)
    }
}
