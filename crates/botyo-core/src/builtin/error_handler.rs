use async_trait::async_trait;

use crate::{
    chat::Message,
    module::{CommandErrorHandler, CommandModule, Module, ModuleContext},
};

/// Apologises to the sender by first name.
#[derive(Debug, Default)]
pub struct FriendlyCommandErrorHandler;

impl FriendlyCommandErrorHandler {
    pub const NAME: &'static str = "FriendlyCommandErrorHandler";
}

impl Module for FriendlyCommandErrorHandler {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl CommandErrorHandler for FriendlyCommandErrorHandler {
    async fn handle(
        &self,
        ctx: &ModuleContext,
        _error: &anyhow::Error,
        msg: &Message,
        _command: &dyn CommandModule,
    ) -> anyhow::Result<()> {
        let sorry = match ctx.threads().first_name_by_message(msg) {
            Some(first_name) => format!("Sorry, {first_name}"),
            None => "Sorry".to_string(),
        };
        ctx.chat()
            .send_message(&msg.thread_id, &format!("{sorry}. Something went wrong. :/"))
            .await?;
        Ok(())
    }
}
