use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::{
    chat::types::{Message, ThreadInfo, UserIdSearchResult, UserInfo},
    domain::{ParticipantId, ThreadId},
    Result,
};

/// Chat transport port.
///
/// The core only calls these operations; login, reconnects and rate limiting
/// belong to the adapter.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, thread: &ThreadId, body: &str) -> Result<()>;

    async fn mark_as_read(&self, thread: &ThreadId) -> Result<()>;

    /// Starts a typing indicator; the returned handle ends it.
    async fn send_typing_indicator(&self, thread: &ThreadId) -> Result<TypingIndicator>;

    async fn get_thread_info(&self, thread: &ThreadId) -> Result<ThreadInfo>;

    /// Up to `amount` messages older than `before_timestamp` (ms, `None` = newest),
    /// oldest first.
    async fn get_thread_history(
        &self,
        thread: &ThreadId,
        amount: usize,
        before_timestamp: Option<i64>,
    ) -> Result<Vec<Message>>;

    async fn get_user_info(
        &self,
        ids: &[ParticipantId],
    ) -> Result<HashMap<ParticipantId, UserInfo>>;

    async fn get_user_id(&self, name: &str) -> Result<Vec<UserIdSearchResult>>;

    fn current_user_id(&self) -> ParticipantId;

    /// Starts delivering inbound messages to `sink` until the returned handle
    /// is invoked.
    async fn listen(&self, sink: mpsc::UnboundedSender<Message>) -> Result<StopListening>;
}

/// Stops a running `listen`.
pub struct StopListening(Box<dyn FnOnce() + Send>);

impl StopListening {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn stop(self) {
        (self.0)()
    }
}

impl fmt::Debug for StopListening {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopListening")
    }
}

type EndTyping = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Handle of an open typing indicator. Dropping it without calling
/// [`TypingIndicator::end`] leaves ending the indicator to the transport.
pub struct TypingIndicator {
    end: EndTyping,
}

impl TypingIndicator {
    pub fn new<F>(end: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        Self { end: Box::new(end) }
    }

    pub fn noop() -> Self {
        Self::new(|| Box::pin(async { Ok(()) }))
    }

    pub async fn end(self) -> Result<()> {
        (self.end)().await
    }
}

impl fmt::Debug for TypingIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TypingIndicator")
    }
}
