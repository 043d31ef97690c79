//! Message history cache: a filter that records inbound messages and a
//! scheduled task that backfills each thread's history from the transport.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    chat::Message,
    domain::{MessageId, ThreadId},
    module::{FilterModule, Module, ModuleContext, ScheduledTaskModule},
    scheduler::Schedule,
    Error, Result,
};

/// Largest batch requested from the transport at once.
pub const MAX_BATCH: usize = 500;

#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn count(&self, thread: &ThreadId) -> Result<u64>;

    /// Insert or replace by message id. Returns how many messages were new.
    async fn upsert_many(&self, thread: &ThreadId, messages: &[Message]) -> Result<usize>;
}

/// Process-local cache; contents are lost on restart.
#[derive(Default)]
pub struct InMemoryMessageCache {
    threads: RwLock<HashMap<ThreadId, HashMap<MessageId, Message>>>,
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached messages of `thread`, oldest first.
    pub fn messages(&self, thread: &ThreadId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .threads
            .read()
            .get(thread)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

#[async_trait]
impl MessageCache for InMemoryMessageCache {
    async fn count(&self, thread: &ThreadId) -> Result<u64> {
        Ok(self.threads.read().get(thread).map_or(0, |m| m.len() as u64))
    }

    async fn upsert_many(&self, thread: &ThreadId, messages: &[Message]) -> Result<usize> {
        let mut threads = self.threads.write();
        let cached = threads.entry(thread.clone()).or_default();
        let mut inserted = 0;
        for msg in messages {
            if cached.insert(msg.message_id.clone(), msg.clone()).is_none() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// Stores every message it sees; never drops anything.
pub struct MessageCacheFilter {
    cache: Arc<dyn MessageCache>,
}

impl MessageCacheFilter {
    pub const NAME: &'static str = "MessageCacheFilter";

    pub fn new(cache: Arc<dyn MessageCache>) -> Self {
        Self { cache }
    }
}

impl Module for MessageCacheFilter {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl FilterModule for MessageCacheFilter {
    async fn filter(&self, _ctx: &ModuleContext, msg: Message) -> anyhow::Result<Option<Message>> {
        if let Err(e) = self
            .cache
            .upsert_many(&msg.thread_id, std::slice::from_ref(&msg))
            .await
        {
            tracing::warn!(thread = %msg.thread_id, "could not cache message: {e}");
        }
        Ok(Some(msg))
    }
}

/// What a thread's cache needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadPlan {
    UpToDate,
    /// Cache is `n` messages behind.
    Behind(u64),
    /// Cache holds more than the transport reports; refetch everything.
    Stale(u64),
}

impl DownloadPlan {
    pub fn new(cached: u64, remote: u64) -> Self {
        if cached == remote {
            DownloadPlan::UpToDate
        } else if cached > remote {
            DownloadPlan::Stale(remote)
        } else {
            DownloadPlan::Behind(remote - cached)
        }
    }

    pub fn amount(self) -> u64 {
        match self {
            DownloadPlan::UpToDate => 0,
            DownloadPlan::Behind(n) | DownloadPlan::Stale(n) => n,
        }
    }
}

pub struct ThreadHistoryDownloader {
    cache: Arc<dyn MessageCache>,
}

impl ThreadHistoryDownloader {
    pub const NAME: &'static str = "ThreadHistoryDownloader";
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

    pub fn new(cache: Arc<dyn MessageCache>) -> Self {
        Self { cache }
    }

    async fn download_thread(
        &self,
        ctx: &ModuleContext,
        thread: &ThreadId,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let cached = self.cache.count(thread).await?;
        let remote = ctx.chat().get_thread_info(thread).await?.message_count;
        tracing::info!(thread = %thread, cached, remote, "comparing message counts");

        let plan = DownloadPlan::new(cached, remote);
        match plan {
            DownloadPlan::UpToDate => {
                tracing::info!(thread = %thread, "message cache is up to date");
                return Ok(0);
            }
            DownloadPlan::Stale(_) => tracing::warn!(
                thread = %thread,
                cached,
                remote,
                "cache holds more messages than reported; downloading the whole history"
            ),
            DownloadPlan::Behind(n) => {
                tracing::info!(thread = %thread, behind = n, "message cache is behind")
            }
        }

        let total = plan.amount();
        let per_request = total.min(MAX_BATCH as u64) as usize;
        let mut before = None;
        let mut downloaded = 0u64;

        while downloaded < total {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let batch = ctx
                .chat()
                .get_thread_history(thread, per_request, before)
                .await?;
            let Some(oldest) = batch.iter().map(|m| m.timestamp).min() else {
                break;
            };
            before = Some(oldest);
            downloaded += batch.len() as u64;

            let inserted = self.cache.upsert_many(thread, &batch).await?;
            tracing::info!(
                thread = %thread,
                downloaded,
                total,
                new = inserted,
                "downloaded history batch"
            );
        }
        Ok(downloaded)
    }
}

impl Module for ThreadHistoryDownloader {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl ScheduledTaskModule for ThreadHistoryDownloader {
    async fn execute(&self, ctx: &ModuleContext, cancel: CancellationToken) -> anyhow::Result<()> {
        let threads = ctx.threads().thread_ids();
        let results = join_all(
            threads
                .iter()
                .map(|thread| self.download_thread(ctx, thread, &cancel)),
        )
        .await;

        let mut failed = 0;
        for (thread, result) in threads.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!(thread = %thread, "history download failed: {e}");
            }
        }
        if failed > 0 {
            anyhow::bail!("history download failed for {failed} chat thread(s)");
        }
        Ok(())
    }

    fn schedule(&self, ctx: &ModuleContext) -> Result<Schedule> {
        let config = ctx.configuration();
        match config.raw().get("schedule") {
            Some(value) => Schedule::from_value(value),
            None => Ok(Schedule::Interval(Self::DEFAULT_INTERVAL)),
        }
    }

    fn should_execute_on_start(&self, ctx: &ModuleContext) -> bool {
        ctx.configuration()
            .get_or_else("executeOnStart", true)
            .unwrap_or(true)
    }
}
