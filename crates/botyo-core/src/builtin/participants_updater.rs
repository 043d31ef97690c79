use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    module::{Module, ModuleContext, ScheduledTaskModule},
    participants::ParticipantsResolver,
    scheduler::Schedule,
    Result,
};

/// Periodically refreshes thread participants and their names.
pub struct ChatThreadParticipantsUpdaterTask {
    resolver: Arc<ParticipantsResolver>,
}

impl ChatThreadParticipantsUpdaterTask {
    pub const NAME: &'static str = "ChatThreadParticipantsUpdaterTask";
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

    pub fn new(resolver: Arc<ParticipantsResolver>) -> Self {
        Self { resolver }
    }
}

impl Module for ChatThreadParticipantsUpdaterTask {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl ScheduledTaskModule for ChatThreadParticipantsUpdaterTask {
    async fn execute(&self, _ctx: &ModuleContext, cancel: CancellationToken) -> anyhow::Result<()> {
        self.resolver.populate_actual_participants().await?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.resolver.populate_participants_info().await?;
        Ok(())
    }

    fn schedule(&self, ctx: &ModuleContext) -> Result<Schedule> {
        match ctx.configuration().raw().get("schedule") {
            Some(value) => Schedule::from_value(value),
            None => Ok(Schedule::Interval(Self::DEFAULT_INTERVAL)),
        }
    }
}
