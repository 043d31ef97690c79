//! Composition root: wires configuration, registry, command table, pipeline,
//! scheduler and the chat transport, and owns the start/stop lifecycle.

use std::{path::PathBuf, sync::Arc};

use serde_json::{Map, Value};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    builtin::{ChatThreadFilter, ChatThreadParticipantsUpdaterTask, FriendlyCommandErrorHandler, HelpCommand},
    chat::{ChatApi, StopListening},
    commands::CommandManager,
    config::{ConfigStore, CONFIG_KEY_MODULES},
    context::ContextResolver,
    module::{CommandErrorHandler, ModuleContext, ModuleKind, Runtime},
    participants::ParticipantsResolver,
    pipeline::FilterPipeline,
    registry::ModuleRegistry,
    router::CommandRouter,
    scheduler::Scheduler,
    Error, Result,
};

#[derive(Default)]
pub struct BotBuilder {
    config: Option<ConfigStore>,
    config_file: Option<PathBuf>,
    modules: Vec<ModuleKind>,
    module_configs: Vec<(String, Value)>,
    error_handler: Option<Arc<dyn CommandErrorHandler>>,
}

impl BotBuilder {
    pub fn configuration(mut self, config: ConfigStore) -> Self {
        self.config = Some(config);
        self
    }

    pub fn configuration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn register_module(mut self, module: ModuleKind) -> Self {
        self.modules.push(module);
        self
    }

    /// Register `module` and merge `config` over `modules.<name>`.
    pub fn register_module_with_config(mut self, module: ModuleKind, config: Value) -> Self {
        self.module_configs.push((module.name().to_string(), config));
        self.modules.push(module);
        self
    }

    pub fn register_command_error_handler(
        mut self,
        handler: impl CommandErrorHandler + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self, chat: Arc<dyn ChatApi>) -> Result<Bot> {
        let config = match (self.config, self.config_file) {
            (Some(config), _) => config,
            (None, Some(path)) => ConfigStore::from_yaml_file(path)?,
            (None, None) => {
                return Err(Error::Config("no application configuration given".into()))
            }
        };
        for (name, module_config) in self.module_configs {
            let mut modules = Map::new();
            modules.insert(name, module_config);
            let mut root = Map::new();
            root.insert(CONFIG_KEY_MODULES.to_string(), Value::Object(modules));
            config.merge_raw(&Value::Object(root));
        }

        let config = Arc::new(config);
        Ok(Bot {
            participants: Arc::new(ParticipantsResolver::new(chat.clone(), config.clone())),
            config,
            chat,
            modules: self.modules,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(FriendlyCommandErrorHandler)),
            state: tokio::sync::Mutex::new(BotState::default()),
        })
    }
}

pub struct Bot {
    config: Arc<ConfigStore>,
    chat: Arc<dyn ChatApi>,
    modules: Vec<ModuleKind>,
    error_handler: Arc<dyn CommandErrorHandler>,
    participants: Arc<ParticipantsResolver>,
    state: tokio::sync::Mutex<BotState>,
}

#[derive(Default)]
struct BotState {
    running: Option<Running>,
}

struct Running {
    rt: Arc<Runtime>,
    modules: Vec<ModuleKind>,
    scheduler: Scheduler,
    stop_listening: StopListening,
    dispatcher: JoinHandle<()>,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::default()
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// Shared services of the running bot.
    pub async fn runtime(&self) -> Option<Arc<Runtime>> {
        self.state.lock().await.running.as_ref().map(|r| r.rt.clone())
    }

    pub async fn scheduler(&self) -> Option<Scheduler> {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .map(|r| r.scheduler.clone())
    }

    /// Register modules, build the command table, resolve participants, start
    /// listening and scheduling. Does nothing when already running.
    pub async fn start(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.running.is_some() {
            return Ok(());
        }

        let registry = self.build_registry()?;
        let commands = CommandManager::new(
            ContextResolver::new(self.config.clone()),
            registry.command_modules(),
        );
        commands.populate()?;

        self.participants.resolve().await?;

        let rt = Arc::new(Runtime::new(self.config.clone(), self.chat.clone(), commands));
        let scheduler = Scheduler::new(rt.clone(), registry.scheduled_task_modules());
        scheduler.validate()?;

        let pipeline = Arc::new(FilterPipeline::new(rt.clone(), registry.filter_modules()));
        tracing::info!(filters = ?pipeline.filter_names(), "filter chain assembled");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop_listening = self.chat.listen(tx).await?;
        let dispatcher = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline.pass(msg).await;
                });
            }
        });

        let modules = registry.modules().to_vec();
        for module in &modules {
            let ctx = ModuleContext::new(rt.clone(), module.name());
            if let Err(e) = module.on_listen(&ctx).await {
                tracing::warn!(module = %module.name(), "on_listen failed: {e:#}");
            }
        }
        let handler_ctx = ModuleContext::new(rt.clone(), self.error_handler.name());
        if let Err(e) = self.error_handler.on_listen(&handler_ctx).await {
            tracing::warn!(module = %self.error_handler.name(), "on_listen failed: {e:#}");
        }

        if let Err(e) = scheduler.start() {
            self.run_shutdown_hooks(&rt, &modules).await;
            stop_listening.stop();
            dispatcher.abort();
            return Err(e);
        }

        tracing::info!(modules = modules.len(), "bot started");
        st.running = Some(Running {
            rt,
            modules,
            scheduler,
            stop_listening,
            dispatcher,
        });
        Ok(())
    }

    /// Run shutdown hooks, stop the scheduler, stop listening. Does nothing
    /// when not running.
    pub async fn stop(&self) {
        let Some(running) = self.state.lock().await.running.take() else {
            return;
        };
        tracing::info!("bot is shutting down");

        self.run_shutdown_hooks(&running.rt, &running.modules).await;

        running.scheduler.stop();
        running.stop_listening.stop();
        running.dispatcher.abort();
        tracing::info!("bot has been shut down");
    }

    async fn run_shutdown_hooks(&self, rt: &Arc<Runtime>, modules: &[ModuleKind]) {
        for module in modules {
            let ctx = ModuleContext::new(rt.clone(), module.name());
            if let Err(e) = module.on_shutdown(&ctx).await {
                tracing::warn!(module = %module.name(), "non-fatal error while shutting down: {e:#}");
            }
        }
        let handler_ctx = ModuleContext::new(rt.clone(), self.error_handler.name());
        if let Err(e) = self.error_handler.on_shutdown(&handler_ctx).await {
            tracing::warn!(module = %self.error_handler.name(), "non-fatal error while shutting down: {e:#}");
        }
    }

    fn build_registry(&self) -> Result<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();
        registry.register(ModuleKind::scheduled_task(
            ChatThreadParticipantsUpdaterTask::new(self.participants.clone()),
        ))?;
        registry.register(ModuleKind::filter(ChatThreadFilter))?;
        registry.set_error_handler(self.error_handler.clone());
        registry.register(ModuleKind::command(HelpCommand))?;
        for module in &self.modules {
            registry.register(module.clone())?;
        }
        registry.register(ModuleKind::filter(CommandRouter::new(
            self.error_handler.clone(),
        )))?;
        Ok(registry)
    }
}
