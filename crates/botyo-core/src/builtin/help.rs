use async_trait::async_trait;

use crate::{
    chat::Message,
    module::{CommandModule, CommandNames, Module, ModuleContext},
};

/// `help [ command ]`: lists visible commands or prints one command's usage.
#[derive(Debug, Default)]
pub struct HelpCommand;

impl HelpCommand {
    pub const NAME: &'static str = "HelpCommand";

    fn command_list(ctx: &ModuleContext, msg: &Message, prefix: &str) -> String {
        let commands = ctx.commands();
        let mut text = String::from("\u{1F527} Command list:\n\n");
        for module in commands.modules() {
            if commands.is_hidden_in_context(module.as_ref(), msg)
                || !commands.is_enabled_in_context(module.as_ref(), msg)
            {
                continue;
            }
            let Some(name) = commands.primary_name(module.as_ref(), &msg.thread_id) else {
                continue;
            };
            text.push_str(&format!("{prefix}{name} - {}\n", module.description()));
        }
        text
    }

    fn command_help(ctx: &ModuleContext, msg: &Message, prefix: &str, args: &str) -> String {
        let token = args.split_whitespace().next().unwrap_or_default();
        let name = token.strip_prefix(prefix).unwrap_or(token);

        let commands = ctx.commands();
        match commands.command(&msg.thread_id, name) {
            Some(module) => commands.make_help_text(prefix, name, module.as_ref()),
            None => format!("\u{26A0} Unknown command: {prefix}{name}"),
        }
    }
}

impl Module for HelpCommand {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl CommandModule for HelpCommand {
    fn command(&self) -> CommandNames {
        "help".into()
    }

    fn description(&self) -> String {
        "Responds with information how to use the available commands".into()
    }

    fn usage(&self) -> String {
        "[ command ]".into()
    }

    async fn execute(&self, ctx: &ModuleContext, msg: &Message, args: &str) -> anyhow::Result<()> {
        let prefix = ctx.commands().prefix_of_context(&msg.thread_id);
        let reply = if args.is_empty() {
            Self::command_list(ctx, msg, &prefix)
        } else {
            Self::command_help(ctx, msg, &prefix, args)
        };
        ctx.chat().send_message(&msg.thread_id, &reply).await?;
        Ok(())
    }
}
