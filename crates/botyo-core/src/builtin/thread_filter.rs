use async_trait::async_trait;

use crate::{
    chat::Message,
    module::{FilterModule, Module, ModuleContext},
};

/// Drops messages from chat threads missing under `chatThreads`.
#[derive(Debug, Default)]
pub struct ChatThreadFilter;

impl ChatThreadFilter {
    pub const NAME: &'static str = "ChatThreadFilter";
}

impl Module for ChatThreadFilter {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl FilterModule for ChatThreadFilter {
    async fn filter(&self, ctx: &ModuleContext, msg: Message) -> anyhow::Result<Option<Message>> {
        if !ctx.threads().is_configured(&msg.thread_id) {
            tracing::info!(thread = %msg.thread_id, "message from a chat thread we are not listening to");
            return Ok(None);
        }
        Ok(Some(msg))
    }
}
