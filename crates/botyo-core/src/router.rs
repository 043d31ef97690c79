//! Terminal filter turning a command message into a command execution.

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;

use crate::{
    chat::Message,
    commands::COMMAND_ROUTER,
    module::{CommandErrorHandler, CommandModule, FilterModule, Module, ModuleContext},
};

pub struct CommandRouter {
    error_handler: Arc<dyn CommandErrorHandler>,
}

impl CommandRouter {
    pub fn new(error_handler: Arc<dyn CommandErrorHandler>) -> Self {
        Self { error_handler }
    }

    fn should_process(&self, ctx: &ModuleContext, msg: &Message) -> bool {
        if !ctx.for_message(msg).is_enabled() {
            return false;
        }
        if msg.body.is_empty() {
            return false;
        }
        let prefix = ctx.commands().prefix_of_context(&msg.thread_id);
        msg.body.starts_with(prefix.as_str())
    }

    async fn execute(
        &self,
        ctx: &ModuleContext,
        command_name: &str,
        command: Arc<dyn CommandModule>,
        msg: &Message,
        args: &str,
    ) {
        let chat = ctx.chat().clone();

        let read_chat = chat.clone();
        let read_thread = msg.thread_id.clone();
        tokio::spawn(async move {
            if let Err(e) = read_chat.mark_as_read(&read_thread).await {
                tracing::warn!(thread = %read_thread, "mark as read failed: {e}");
            }
        });

        let typing = match chat.send_typing_indicator(&msg.thread_id).await {
            Ok(typing) => Some(typing),
            Err(e) => {
                tracing::warn!(thread = %msg.thread_id, "typing indicator failed: {e}");
                None
            }
        };

        let command_ctx = ModuleContext::new(ctx.runtime().clone(), command.name());
        let outcome = AssertUnwindSafe(command.execute(&command_ctx, msg, args))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("command panicked")));

        if let Err(err) = outcome {
            let handler_ctx = ModuleContext::new(ctx.runtime().clone(), self.error_handler.name());
            let handled = AssertUnwindSafe(self.error_handler.handle(
                &handler_ctx,
                &err,
                msg,
                command.as_ref(),
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("error handler panicked")));
            if let Err(e) = handled {
                tracing::error!(
                    handler = %self.error_handler.name(),
                    "command error handler failed: {e:#}"
                );
            }

            tracing::error!(
                command = %command_name,
                module = %command.name(),
                thread = %msg.thread_id,
                "command failed: {err:#}"
            );
        }

        if let Some(typing) = typing {
            if let Err(e) = typing.end().await {
                tracing::warn!(thread = %msg.thread_id, "ending typing indicator failed: {e}");
            }
        }
    }
}

impl Module for CommandRouter {
    fn name(&self) -> &str {
        COMMAND_ROUTER
    }
}

#[async_trait]
impl FilterModule for CommandRouter {
    async fn filter(&self, ctx: &ModuleContext, msg: Message) -> anyhow::Result<Option<Message>> {
        if !self.should_process(ctx, &msg) {
            return Ok(Some(msg));
        }

        let commands = ctx.commands();
        let Some(command_name) = commands.command_name_from_message(&msg) else {
            return Ok(Some(msg));
        };
        let Some(command) = commands.command(&msg.thread_id, &command_name) else {
            tracing::info!(command = %command_name, thread = %msg.thread_id, "unknown command");
            return Ok(None);
        };

        if !commands.is_enabled_in_context(command.as_ref(), &msg) {
            tracing::info!(
                command = %command_name,
                thread = %msg.thread_id,
                participant = %msg.sender_id,
                "command is disabled in context"
            );
            return Ok(Some(msg));
        }

        let args = commands.args_from_message(&msg);
        if !command.validate(&msg, &args) {
            let prefix = commands.prefix_of_context(&msg.thread_id);
            let help = commands.make_help_text(&prefix, &command_name, command.as_ref());
            ctx.chat()
                .send_message(&msg.thread_id, &format!("\u{26A0} Incorrect syntax\n\n{help}"))
                .await?;
            return Ok(Some(msg));
        }

        self.execute(ctx, &command_name, command, &msg, &args).await;
        Ok(None)
    }
}
