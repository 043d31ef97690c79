use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use botyo_core::{
    chat::{ChatApi, Message, StopListening, ThreadInfo, TypingIndicator, UserIdSearchResult, UserInfo},
    config::ConfigStore,
    domain::{ParticipantId, ThreadId},
    scheduler::Schedule,
    Bot, CommandModule, CommandNames, Error, Module, ModuleContext, ModuleKind, Result,
    ScheduledTaskModule,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<(String, String)>>,
    sink: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    listening: Arc<AtomicBool>,
}

impl FakeTransport {
    fn push(&self, thread: &str, sender: &str, body: &str) {
        let sink = self.sink.lock().unwrap();
        let sink = sink.as_ref().expect("bot is not listening");
        sink.send(Message::new(thread, sender, body)).unwrap();
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    async fn wait_for_replies(&self, n: usize) -> Vec<(String, String)> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} replies, got {:?}", self.sent());
    }
}

#[async_trait]
impl ChatApi for FakeTransport {
    async fn send_message(&self, thread: &ThreadId, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((thread.to_string(), body.to_string()));
        Ok(())
    }

    async fn mark_as_read(&self, _thread: &ThreadId) -> Result<()> {
        Ok(())
    }

    async fn send_typing_indicator(&self, _thread: &ThreadId) -> Result<TypingIndicator> {
        Ok(TypingIndicator::noop())
    }

    async fn get_thread_info(&self, thread: &ThreadId) -> Result<ThreadInfo> {
        Err(Error::External(format!("no info for {thread}")))
    }

    async fn get_thread_history(
        &self,
        _thread: &ThreadId,
        _amount: usize,
        _before_timestamp: Option<i64>,
    ) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn get_user_info(
        &self,
        _ids: &[ParticipantId],
    ) -> Result<HashMap<ParticipantId, UserInfo>> {
        Ok(HashMap::new())
    }

    async fn get_user_id(&self, _name: &str) -> Result<Vec<UserIdSearchResult>> {
        Ok(Vec::new())
    }

    fn current_user_id(&self) -> ParticipantId {
        ParticipantId::from("0")
    }

    async fn listen(&self, sink: mpsc::UnboundedSender<Message>) -> Result<StopListening> {
        *self.sink.lock().unwrap() = Some(sink);
        self.listening.store(true, Ordering::SeqCst);

        let slot = self.sink.clone();
        let listening = self.listening.clone();
        Ok(StopListening::new(move || {
            slot.lock().unwrap().take();
            listening.store(false, Ordering::SeqCst);
        }))
    }
}

/// Replies with the effective `maxWords` of the sender's context.
#[derive(Default)]
struct QuoteCommand {
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for QuoteCommand {
    fn name(&self) -> &str {
        "Quote"
    }

    async fn on_shutdown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CommandModule for QuoteCommand {
    fn command(&self) -> CommandNames {
        "quote".into()
    }

    fn description(&self) -> String {
        "Quotes someone".into()
    }

    async fn execute(&self, ctx: &ModuleContext, msg: &Message, _args: &str) -> anyhow::Result<()> {
        let max_words: u32 = ctx.for_message(msg).get("maxWords")?;
        ctx.chat()
            .send_message(&msg.thread_id, &format!("maxWords={max_words}"))
            .await?;
        Ok(())
    }
}

struct NamedCommand(&'static str, &'static str);

impl Module for NamedCommand {
    fn name(&self) -> &str {
        self.0
    }
}

#[async_trait]
impl CommandModule for NamedCommand {
    fn command(&self) -> CommandNames {
        self.1.into()
    }

    fn description(&self) -> String {
        String::new()
    }

    async fn execute(&self, _ctx: &ModuleContext, _msg: &Message, _args: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

const QUOTE_CONFIG: &str = r#"
modules:
  Quote:
    maxWords: 20
chatThreads:
  100:
    overrides:
      modules:
        Quote:
          maxWords: 5
  200:
    participants:
      john.doe:
        overrides:
          modules:
            Quote:
              maxWords: 1
"#;

#[tokio::test]
async fn thread_override_applies_to_commands() {
    let transport = Arc::new(FakeTransport::default());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str(QUOTE_CONFIG).unwrap())
        .register_module(ModuleKind::command(QuoteCommand::default()))
        .build(transport.clone())
        .unwrap();
    bot.start().await.unwrap();

    transport.push("100", "7", "#quote");
    transport.wait_for_replies(1).await;
    transport.push("200", "7", "#quote");
    let sent = transport.wait_for_replies(2).await;

    assert_eq!(
        sent,
        [
            ("100".to_string(), "maxWords=5".to_string()),
            ("200".to_string(), "maxWords=20".to_string()),
        ]
    );
    // the vanity participant key survived loading unexpanded
    assert!(bot
        .config()
        .has_at(&["chatThreads", "200", "participants", "john.doe"]));
    bot.stop().await;
}

#[tokio::test]
async fn messages_from_unknown_threads_are_dropped() {
    let transport = Arc::new(FakeTransport::default());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str(QUOTE_CONFIG).unwrap())
        .register_module(ModuleKind::command(QuoteCommand::default()))
        .build(transport.clone())
        .unwrap();
    bot.start().await.unwrap();

    transport.push("999", "7", "#quote");
    transport.push("100", "7", "#help quote");
    let sent = transport.wait_for_replies(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.sent().len(), 1);
    assert_eq!(sent[0].0, "100");
    assert!(sent[0].1.contains("#quote - Quotes someone"), "{}", sent[0].1);
    bot.stop().await;
}

#[tokio::test]
async fn module_config_supplied_at_registration_is_merged() {
    let transport = Arc::new(FakeTransport::default());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str("chatThreads:\n  300: {}\n").unwrap())
        .register_module_with_config(ModuleKind::command(QuoteCommand::default()), json!({"maxWords": 7}))
        .build(transport.clone())
        .unwrap();
    bot.start().await.unwrap();

    transport.push("300", "1", "#quote");
    let sent = transport.wait_for_replies(1).await;
    assert_eq!(sent[0].1, "maxWords=7");
    bot.stop().await;
}

#[tokio::test]
async fn duplicate_commands_fail_startup_naming_both_modules() {
    let transport = Arc::new(FakeTransport::default());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str("chatThreads:\n  1: {}\n").unwrap())
        .register_module(ModuleKind::command(NamedCommand("First", "go")))
        .register_module(ModuleKind::command(NamedCommand("Second", "go")))
        .build(transport.clone())
        .unwrap();

    let err = bot.start().await.unwrap_err().to_string();
    assert!(err.contains("'First'") && err.contains("'Second'"), "{err}");
    assert!(!bot.is_running().await);
    assert!(!transport.listening.load(Ordering::SeqCst));
}

#[tokio::test]
async fn per_thread_rename_collision_fails_startup() {
    let config = r#"
chatThreads:
  1:
    overrides:
      modules:
        Second:
          command: go
"#;
    let transport = Arc::new(FakeTransport::default());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str(config).unwrap())
        .register_module(ModuleKind::command(NamedCommand("First", "go")))
        .register_module(ModuleKind::command(NamedCommand("Second", "stay")))
        .build(transport.clone())
        .unwrap();

    match bot.start().await {
        Err(Error::DuplicateCommand {
            existing,
            attempted,
            thread,
            ..
        }) => {
            assert_eq!((existing.as_str(), attempted.as_str()), ("First", "Second"));
            assert_eq!(thread.as_deref(), Some("1"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let transport = Arc::new(FakeTransport::default());
    let quote = QuoteCommand::default();
    let shutdowns = quote.shutdowns.clone();
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str(QUOTE_CONFIG).unwrap())
        .register_module(ModuleKind::command(quote))
        .build(transport.clone())
        .unwrap();

    bot.start().await.unwrap();
    bot.start().await.unwrap();
    assert!(bot.is_running().await);
    assert!(transport.listening.load(Ordering::SeqCst));
    let scheduler = bot.scheduler().await.unwrap();
    assert_eq!(
        scheduler.scheduled_tasks(),
        ["ChatThreadParticipantsUpdaterTask"]
    );

    bot.stop().await;
    bot.stop().await;
    assert!(!bot.is_running().await);
    assert!(!transport.listening.load(Ordering::SeqCst));
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(scheduler.scheduled_tasks().is_empty());
}

#[tokio::test]
async fn missing_configuration_is_an_error() {
    let transport = Arc::new(FakeTransport::default());
    assert!(matches!(
        Bot::builder().build(transport.clone()),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Bot::builder()
            .configuration_file("/nonexistent/botyo.yaml")
            .build(transport),
        Err(Error::MissingConfigFile(_))
    ));
}

/// Scheduled task counting its lifecycle hooks.
struct HookedTask {
    cron: &'static str,
    listens: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl HookedTask {
    fn new(cron: &'static str) -> Self {
        Self {
            cron,
            listens: Arc::default(),
            shutdowns: Arc::default(),
        }
    }
}

#[async_trait]
impl Module for HookedTask {
    fn name(&self) -> &str {
        "Hooked"
    }

    async fn on_listen(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_shutdown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ScheduledTaskModule for HookedTask {
    async fn execute(&self, _ctx: &ModuleContext, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    fn schedule(&self, _ctx: &ModuleContext) -> Result<Schedule> {
        Ok(Schedule::Cron(self.cron.to_string()))
    }
}

#[tokio::test]
async fn invalid_schedule_fails_startup_before_listening() {
    let transport = Arc::new(FakeTransport::default());
    let task = HookedTask::new("not a cron");
    let (listens, shutdowns) = (task.listens.clone(), task.shutdowns.clone());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str("chatThreads:\n  1: {}\n").unwrap())
        .register_module(ModuleKind::scheduled_task(task))
        .build(transport.clone())
        .unwrap();

    assert!(matches!(bot.start().await, Err(Error::Config(_))));
    assert!(!bot.is_running().await);
    assert!(!transport.listening.load(Ordering::SeqCst));
    assert_eq!(listens.load(Ordering::SeqCst), 0);

    bot.stop().await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scheduled_task_hooks_run_once_per_lifecycle() {
    let transport = Arc::new(FakeTransport::default());
    let task = HookedTask::new("0 0 29 2 *");
    let (listens, shutdowns) = (task.listens.clone(), task.shutdowns.clone());
    let bot = Bot::builder()
        .configuration(ConfigStore::from_yaml_str("chatThreads:\n  1: {}\n").unwrap())
        .register_module(ModuleKind::scheduled_task(task))
        .build(transport.clone())
        .unwrap();

    bot.start().await.unwrap();
    assert_eq!(listens.load(Ordering::SeqCst), 1);
    let mut scheduled = bot.scheduler().await.unwrap().scheduled_tasks();
    scheduled.sort();
    assert_eq!(scheduled, ["ChatThreadParticipantsUpdaterTask", "Hooked"]);

    bot.stop().await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}
