//! Plugin contracts. A registered module has exactly one role, fixed when it is
//! wrapped in a [`ModuleKind`].

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    chat::{ChatApi, Message},
    commands::CommandManager,
    config::ConfigStore,
    context::{ContextResolver, Scope, ScopedConfig},
    domain::{ParticipantId, ThreadId},
    scheduler::Schedule,
    threads::ChatThreads,
    Result,
};

/// Common surface of every plugin.
#[async_trait]
pub trait Module: Send + Sync {
    /// Configuration namespace: `modules.<name>`.
    fn name(&self) -> &str;

    /// Called once the bot is listening.
    async fn on_listen(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_shutdown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One or several names a command answers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandNames {
    One(String),
    Many(Vec<String>),
}

impl CommandNames {
    pub fn names(&self) -> &[String] {
        match self {
            CommandNames::One(name) => std::slice::from_ref(name),
            CommandNames::Many(names) => names,
        }
    }

    /// The name used in help output.
    pub fn primary(&self) -> Option<&str> {
        self.names().first().map(String::as_str)
    }
}

impl From<&str> for CommandNames {
    fn from(name: &str) -> Self {
        CommandNames::One(name.to_string())
    }
}

impl From<String> for CommandNames {
    fn from(name: String) -> Self {
        CommandNames::One(name)
    }
}

impl From<Vec<&str>> for CommandNames {
    fn from(names: Vec<&str>) -> Self {
        CommandNames::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for CommandNames {
    fn from(names: Vec<String>) -> Self {
        CommandNames::Many(names)
    }
}

#[async_trait]
pub trait CommandModule: Module {
    /// Default command name(s); a chat thread may override them through the
    /// module's `command` property.
    fn command(&self) -> CommandNames;

    fn description(&self) -> String;

    fn usage(&self) -> String {
        String::new()
    }

    fn validate(&self, _msg: &Message, _args: &str) -> bool {
        true
    }

    async fn execute(&self, ctx: &ModuleContext, msg: &Message, args: &str)
        -> anyhow::Result<()>;
}

#[async_trait]
pub trait FilterModule: Module {
    /// `Ok(None)` drops the message; the rest of the chain is skipped.
    async fn filter(&self, ctx: &ModuleContext, msg: Message) -> anyhow::Result<Option<Message>>;
}

#[async_trait]
pub trait ScheduledTaskModule: Module {
    /// `cancel` fires when the scheduler stops; long bodies should check it
    /// between steps.
    async fn execute(&self, ctx: &ModuleContext, cancel: CancellationToken) -> anyhow::Result<()>;

    fn schedule(&self, ctx: &ModuleContext) -> Result<Schedule>;

    fn should_execute_on_start(&self, _ctx: &ModuleContext) -> bool {
        false
    }
}

/// Reacts to a failed command execution.
#[async_trait]
pub trait CommandErrorHandler: Module {
    async fn handle(
        &self,
        ctx: &ModuleContext,
        error: &anyhow::Error,
        msg: &Message,
        command: &dyn CommandModule,
    ) -> anyhow::Result<()>;
}

/// A registered module and its role.
#[derive(Clone)]
pub enum ModuleKind {
    Command(Arc<dyn CommandModule>),
    Filter(Arc<dyn FilterModule>),
    ScheduledTask(Arc<dyn ScheduledTaskModule>),
}

impl ModuleKind {
    pub fn command(module: impl CommandModule + 'static) -> Self {
        ModuleKind::Command(Arc::new(module))
    }

    pub fn filter(module: impl FilterModule + 'static) -> Self {
        ModuleKind::Filter(Arc::new(module))
    }

    pub fn scheduled_task(module: impl ScheduledTaskModule + 'static) -> Self {
        ModuleKind::ScheduledTask(Arc::new(module))
    }

    pub fn name(&self) -> &str {
        match self {
            ModuleKind::Command(m) => m.name(),
            ModuleKind::Filter(m) => m.name(),
            ModuleKind::ScheduledTask(m) => m.name(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ModuleKind::Command(_) => "command",
            ModuleKind::Filter(_) => "filter",
            ModuleKind::ScheduledTask(_) => "scheduled task",
        }
    }

    pub(crate) async fn on_listen(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        match self {
            ModuleKind::Command(m) => m.on_listen(ctx).await,
            ModuleKind::Filter(m) => m.on_listen(ctx).await,
            ModuleKind::ScheduledTask(m) => m.on_listen(ctx).await,
        }
    }

    pub(crate) async fn on_shutdown(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        match self {
            ModuleKind::Command(m) => m.on_shutdown(ctx).await,
            ModuleKind::Filter(m) => m.on_shutdown(ctx).await,
            ModuleKind::ScheduledTask(m) => m.on_shutdown(ctx).await,
        }
    }
}

impl fmt::Debug for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.role(), self.name())
    }
}

/// Shared services, built once by the bot and handed to every plugin call.
pub struct Runtime {
    pub config: Arc<ConfigStore>,
    pub resolver: ContextResolver,
    pub chat: Arc<dyn ChatApi>,
    pub threads: ChatThreads,
    pub commands: CommandManager,
}

impl Runtime {
    pub fn new(config: Arc<ConfigStore>, chat: Arc<dyn ChatApi>, commands: CommandManager) -> Self {
        Self {
            resolver: ContextResolver::new(config.clone()),
            threads: ChatThreads::new(config.clone()),
            config,
            chat,
            commands,
        }
    }
}

/// Runtime accessor of one module.
#[derive(Clone)]
pub struct ModuleContext {
    rt: Arc<Runtime>,
    module: Arc<str>,
}

impl ModuleContext {
    pub fn new(rt: Arc<Runtime>, module: &str) -> Self {
        Self {
            rt,
            module: Arc::from(module),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// The module's global configuration (`modules.<name>`).
    pub fn configuration(&self) -> ScopedConfig {
        self.rt.resolver.scoped(&self.module, &Scope::Global)
    }

    pub fn in_context(&self, thread: &ThreadId, participant: Option<&ParticipantId>) -> ScopedConfig {
        self.rt
            .resolver
            .scoped(&self.module, &Scope::of(thread, participant))
    }

    /// Configuration in the context of the message's thread and sender.
    pub fn for_message(&self, msg: &Message) -> ScopedConfig {
        self.in_context(&msg.thread_id, Some(&msg.sender_id))
    }

    pub fn set_property<T: Serialize>(&self, scope: &Scope, property: &str, value: T) -> Result<()> {
        self.rt
            .resolver
            .set_in_scope(&self.module, scope, property, value)
    }

    pub fn application_configuration(&self) -> &Arc<ConfigStore> {
        &self.rt.config
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.rt.resolver
    }

    pub fn chat(&self) -> &Arc<dyn ChatApi> {
        &self.rt.chat
    }

    pub fn threads(&self) -> &ChatThreads {
        &self.rt.threads
    }

    pub fn commands(&self) -> &CommandManager {
        &self.rt.commands
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.rt
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .finish()
    }
}
