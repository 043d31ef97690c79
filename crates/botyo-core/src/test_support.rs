//! Fakes shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    chat::{ChatApi, Message, StopListening, ThreadInfo, TypingIndicator, UserIdSearchResult, UserInfo},
    commands::CommandManager,
    config::ConfigStore,
    context::ContextResolver,
    domain::{ParticipantId, ThreadId},
    module::{
        CommandModule, CommandNames, FilterModule, Module, ModuleContext, Runtime,
        ScheduledTaskModule,
    },
    scheduler::Schedule,
    Error, Result,
};

pub(crate) fn runtime(
    config: Value,
    commands: Vec<Arc<dyn CommandModule>>,
    chat: Arc<FakeChat>,
) -> Arc<Runtime> {
    let store = Arc::new(ConfigStore::new(config));
    let manager = CommandManager::new(ContextResolver::new(store.clone()), commands);
    manager.populate().unwrap();
    Arc::new(Runtime::new(store, chat, manager))
}

#[derive(Default)]
pub(crate) struct FakeChat {
    sent: Mutex<Vec<(ThreadId, String)>>,
    read: Mutex<Vec<ThreadId>>,
    fail_reads: AtomicBool,
    typing_started: AtomicUsize,
    typing_ended: Arc<AtomicUsize>,
    thread_infos: Mutex<HashMap<ThreadId, ThreadInfo>>,
    user_infos: Mutex<HashMap<ParticipantId, UserInfo>>,
    user_search: Mutex<HashMap<String, Vec<UserIdSearchResult>>>,
    searches: AtomicUsize,
    history: Mutex<HashMap<ThreadId, Vec<Message>>>,
    history_calls: Mutex<Vec<(ThreadId, usize, Option<i64>)>>,
}

impl FakeChat {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sent_bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub(crate) fn typing_started(&self) -> usize {
        self.typing_started.load(Ordering::SeqCst)
    }

    pub(crate) fn typing_ended(&self) -> usize {
        self.typing_ended.load(Ordering::SeqCst)
    }

    pub(crate) fn read_count(&self) -> usize {
        self.read.lock().unwrap().len()
    }

    /// `mark_as_read` still records the call but then fails.
    pub(crate) fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Read receipts are fire-and-forget; yield until `n` have been recorded.
    pub(crate) async fn wait_for_reads(&self, n: usize) {
        for _ in 0..100 {
            if self.read_count() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} read receipts, got {}", self.read_count());
    }

    pub(crate) fn set_thread_info(&self, thread: &str, info: ThreadInfo) {
        self.thread_infos
            .lock()
            .unwrap()
            .insert(ThreadId::from(thread), info);
    }

    pub(crate) fn set_user_info(&self, id: &str, info: UserInfo) {
        self.user_infos
            .lock()
            .unwrap()
            .insert(ParticipantId::from(id), info);
    }

    pub(crate) fn add_user_search(&self, name: &str, results: Vec<UserIdSearchResult>) {
        self.user_search
            .lock()
            .unwrap()
            .insert(name.to_string(), results);
    }

    pub(crate) fn user_searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub(crate) fn set_history(&self, thread: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .insert(ThreadId::from(thread), messages);
    }

    pub(crate) fn history_calls(&self) -> Vec<(ThreadId, usize, Option<i64>)> {
        self.history_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_message(&self, thread: &ThreadId, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((thread.clone(), body.to_string()));
        Ok(())
    }

    async fn mark_as_read(&self, thread: &ThreadId) -> Result<()> {
        self.read.lock().unwrap().push(thread.clone());
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::External("read receipts unavailable".into()));
        }
        Ok(())
    }

    async fn send_typing_indicator(&self, _thread: &ThreadId) -> Result<TypingIndicator> {
        self.typing_started.fetch_add(1, Ordering::SeqCst);
        let ended = self.typing_ended.clone();
        Ok(TypingIndicator::new(move || {
            Box::pin(async move {
                ended.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
    }

    async fn get_thread_info(&self, thread: &ThreadId) -> Result<ThreadInfo> {
        self.thread_infos
            .lock()
            .unwrap()
            .get(thread)
            .cloned()
            .ok_or_else(|| Error::External(format!("unknown thread {thread}")))
    }

    async fn get_thread_history(
        &self,
        thread: &ThreadId,
        amount: usize,
        before_timestamp: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.history_calls
            .lock()
            .unwrap()
            .push((thread.clone(), amount, before_timestamp));

        let history = self.history.lock().unwrap();
        let mut older: Vec<Message> = history
            .get(thread)
            .into_iter()
            .flatten()
            .filter(|m| before_timestamp.map_or(true, |ts| m.timestamp < ts))
            .cloned()
            .collect();
        older.sort_by_key(|m| m.timestamp);
        let skip = older.len().saturating_sub(amount);
        Ok(older.split_off(skip))
    }

    async fn get_user_info(
        &self,
        ids: &[ParticipantId],
    ) -> Result<HashMap<ParticipantId, UserInfo>> {
        let infos = self.user_infos.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| infos.get(id).map(|info| (id.clone(), info.clone())))
            .collect())
    }

    async fn get_user_id(&self, name: &str) -> Result<Vec<UserIdSearchResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .user_search
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn current_user_id(&self) -> ParticipantId {
        ParticipantId::from("0")
    }

    async fn listen(&self, _sink: mpsc::UnboundedSender<Message>) -> Result<StopListening> {
        Ok(StopListening::new(|| {}))
    }
}

/// Replies with its arguments.
pub(crate) struct EchoCommand {
    name: String,
    names: CommandNames,
    fail: bool,
    valid: bool,
    executions: AtomicUsize,
}

impl EchoCommand {
    pub(crate) fn new(name: &str, command: &str) -> Self {
        Self::with_names(name, vec![command])
    }

    pub(crate) fn with_names(name: &str, names: Vec<&str>) -> Self {
        Self {
            name: name.to_string(),
            names: names.into(),
            fail: false,
            valid: true,
            executions: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn rejecting(mut self) -> Self {
        self.valid = false;
        self
    }

    pub(crate) fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl Module for EchoCommand {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CommandModule for EchoCommand {
    fn command(&self) -> CommandNames {
        self.names.clone()
    }

    fn description(&self) -> String {
        "Repeats its arguments".into()
    }

    fn usage(&self) -> String {
        "<text>".into()
    }

    fn validate(&self, _msg: &Message, _args: &str) -> bool {
        self.valid
    }

    async fn execute(&self, ctx: &ModuleContext, msg: &Message, args: &str) -> anyhow::Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("echo failed");
        }
        ctx.chat().send_message(&msg.thread_id, args).await?;
        Ok(())
    }
}

pub(crate) struct NoopFilter {
    name: String,
}

impl NoopFilter {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Module for NoopFilter {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl FilterModule for NoopFilter {
    async fn filter(&self, _ctx: &ModuleContext, msg: Message) -> anyhow::Result<Option<Message>> {
        Ok(Some(msg))
    }
}

#[derive(Clone, Debug)]
pub(crate) enum FilterBehavior {
    Pass,
    Drop,
    Fail,
    Panic,
    Rewrite(String),
}

/// Appends its name to a shared log, then acts per its behavior.
pub(crate) struct RecordingFilter {
    name: String,
    behavior: FilterBehavior,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingFilter {
    pub(crate) fn new(name: &str, behavior: FilterBehavior, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            log,
        }
    }
}

impl Module for RecordingFilter {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl FilterModule for RecordingFilter {
    async fn filter(&self, _ctx: &ModuleContext, mut msg: Message) -> anyhow::Result<Option<Message>> {
        self.log.lock().unwrap().push(self.name.clone());
        match &self.behavior {
            FilterBehavior::Pass => Ok(Some(msg)),
            FilterBehavior::Drop => Ok(None),
            FilterBehavior::Fail => anyhow::bail!("{} failed", self.name),
            FilterBehavior::Panic => panic!("{} panicked", self.name),
            FilterBehavior::Rewrite(body) => {
                msg.body = body.clone();
                Ok(Some(msg))
            }
        }
    }
}

/// Scheduled task counting its runs.
pub(crate) struct CountingTask {
    name: String,
    schedule: Schedule,
    run_time: Duration,
    fail: bool,
    on_start: bool,
    started: AtomicUsize,
    finished: AtomicUsize,
    saw_cancellation: AtomicBool,
}

impl CountingTask {
    pub(crate) fn interval(name: &str, millis: u64) -> Self {
        Self::with_schedule(name, Schedule::Interval(Duration::from_millis(millis)))
    }

    pub(crate) fn cron(name: &str, expr: &str) -> Self {
        Self::with_schedule(name, Schedule::Cron(expr.to_string()))
    }

    fn with_schedule(name: &str, schedule: Schedule) -> Self {
        Self {
            name: name.to_string(),
            schedule,
            run_time: Duration::ZERO,
            fail: false,
            on_start: false,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            saw_cancellation: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_run_time(mut self, millis: u64) -> Self {
        self.run_time = Duration::from_millis(millis);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn on_start(mut self) -> Self {
        self.on_start = true;
        self
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn saw_cancellation(&self) -> bool {
        self.saw_cancellation.load(Ordering::SeqCst)
    }
}

impl Module for CountingTask {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ScheduledTaskModule for CountingTask {
    async fn execute(&self, _ctx: &ModuleContext, cancel: CancellationToken) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.run_time) => {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            _ = cancel.cancelled() => {
                self.saw_cancellation.store(true, Ordering::SeqCst);
            }
        }
        if self.fail {
            anyhow::bail!("{} failed", self.name);
        }
        Ok(())
    }

    fn schedule(&self, _ctx: &ModuleContext) -> Result<Schedule> {
        Ok(self.schedule.clone())
    }

    fn should_execute_on_start(&self, _ctx: &ModuleContext) -> bool {
        self.on_start
    }
}
