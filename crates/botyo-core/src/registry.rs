//! Registration-time index of plugins, by role.

use std::{collections::HashMap, sync::Arc};

use crate::{
    domain::ThreadId,
    errors::Error,
    module::{CommandErrorHandler, CommandModule, FilterModule, ModuleKind, ScheduledTaskModule},
    Result,
};

#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleKind>,
    command_owners: HashMap<String, String>,
    error_handler: Option<Arc<dyn CommandErrorHandler>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `module` under its role. Command modules have every default name
    /// validated and checked against names already registered.
    pub fn register(&mut self, module: ModuleKind) -> Result<()> {
        let name = module.name().to_string();
        if name.is_empty() {
            return Err(Error::Config("module name must not be empty".into()));
        }
        if self.modules.iter().any(|m| m.name() == name) {
            return Err(Error::DuplicateModule(name));
        }

        if let ModuleKind::Command(command) = &module {
            let names = command.command();
            if names.names().is_empty() {
                return Err(Error::Config(format!(
                    "module '{name}' must answer to at least one command"
                )));
            }

            let mut claimed = Vec::new();
            for command_name in names.names() {
                validate_command_name(&name, command_name, None)?;
                let owner = self
                    .command_owners
                    .get(command_name)
                    .or_else(|| claimed.contains(command_name).then_some(&name));
                if let Some(existing) = owner {
                    return Err(Error::DuplicateCommand {
                        command: command_name.clone(),
                        thread: None,
                        existing: existing.clone(),
                        attempted: name.clone(),
                    });
                }
                claimed.push(command_name.clone());
            }
            for command_name in claimed {
                self.command_owners.insert(command_name, name.clone());
            }
        }

        tracing::debug!(module = %name, role = module.role(), "module registered");
        self.modules.push(module);
        Ok(())
    }

    pub fn set_error_handler(&mut self, handler: Arc<dyn CommandErrorHandler>) {
        self.error_handler = Some(handler);
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn CommandErrorHandler>> {
        self.error_handler.as_ref()
    }

    /// All modules in registration order.
    pub fn modules(&self) -> &[ModuleKind] {
        &self.modules
    }

    pub fn command_modules(&self) -> Vec<Arc<dyn CommandModule>> {
        self.modules
            .iter()
            .filter_map(|m| match m {
                ModuleKind::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn filter_modules(&self) -> Vec<Arc<dyn FilterModule>> {
        self.modules
            .iter()
            .filter_map(|m| match m {
                ModuleKind::Filter(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn scheduled_task_modules(&self) -> Vec<Arc<dyn ScheduledTaskModule>> {
        self.modules
            .iter()
            .filter_map(|m| match m {
                ModuleKind::ScheduledTask(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A command name is a single non-empty token.
pub(crate) fn validate_command_name(
    module: &str,
    command: &str,
    thread: Option<&ThreadId>,
) -> Result<()> {
    if command.is_empty() || command.chars().any(char::is_whitespace) {
        return Err(Error::InvalidCommand {
            module: module.to_string(),
            command: command.to_string(),
            thread: thread.map(ToString::to_string),
        });
    }
    Ok(())
}
