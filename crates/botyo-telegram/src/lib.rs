//! Telegram adapter (teloxide).
//!
//! This crate implements the `botyo-core` ChatApi over the Telegram Bot API.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;

use teloxide::{prelude::*, types::ChatAction};

use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

pub mod listener;

use botyo_core::{
    chat::{
        ChatApi, Message as ChatMessage, StopListening, ThreadInfo, TypingIndicator,
        UserIdSearchResult, UserInfo,
    },
    domain::{ParticipantId, ThreadId},
    errors::Error,
    Result,
};

/// Telegram caps a single text message at this many characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// A chat action stays visible for roughly five seconds.
const TYPING_REFRESH: Duration = Duration::from_secs(4);

#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
    me: ParticipantId,
}

impl TelegramChat {
    pub fn new(bot: Bot, me: impl Into<ParticipantId>) -> Self {
        Self { bot, me: me.into() }
    }

    /// Asks Telegram who we are and builds the adapter around that identity.
    pub async fn connect(bot: Bot) -> Result<Self> {
        let me = bot.get_me().await.map_err(Self::map_err)?;
        tracing::info!(user = %me.id, username = ?me.username, "connected to telegram");
        Ok(Self::new(bot, me.id.0.to_string()))
    }

    pub async fn from_token(token: impl Into<String>) -> Result<Self> {
        Self::connect(Bot::new(token)).await
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(thread: &ThreadId) -> Result<teloxide::types::ChatId> {
        parse_chat_id(thread.as_str())
            .map(teloxide::types::ChatId)
            .ok_or_else(|| Error::External(format!("not a telegram chat id: {thread}")))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn participant_ids(
        &self,
        chat: &teloxide::types::Chat,
    ) -> Result<Vec<ParticipantId>> {
        if chat.is_private() {
            return Ok(vec![ParticipantId::from(chat.id.0), self.me.clone()]);
        }

        // The Bot API only exposes the administrators of a group.
        let admins = self
            .with_retry(|| self.bot.get_chat_administrators(chat.id))
            .await?;
        Ok(admins
            .into_iter()
            .map(|member| ParticipantId::new(member.user.id.0.to_string()))
            .collect())
    }
}

#[async_trait]
impl ChatApi for TelegramChat {
    async fn send_message(&self, thread: &ThreadId, body: &str) -> Result<()> {
        let chat = Self::tg_chat(thread)?;
        for chunk in split_message(body, MAX_MESSAGE_LEN) {
            self.with_retry(|| self.bot.send_message(chat, chunk.clone()))
                .await?;
        }
        Ok(())
    }

    async fn mark_as_read(&self, _thread: &ThreadId) -> Result<()> {
        // Bots have no read receipts on Telegram.
        Ok(())
    }

    async fn send_typing_indicator(&self, thread: &ThreadId) -> Result<TypingIndicator> {
        let chat = Self::tg_chat(thread)?;
        self.with_retry(|| self.bot.send_chat_action(chat, ChatAction::Typing))
            .await?;

        let cancel = CancellationToken::new();
        let bot = self.bot.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(TYPING_REFRESH) => {
                        if let Err(e) = bot.send_chat_action(chat, ChatAction::Typing).await {
                            tracing::debug!(chat = chat.0, "typing refresh failed: {e}");
                            break;
                        }
                    }
                }
            }
        });

        Ok(TypingIndicator::new(move || {
            Box::pin(async move {
                cancel.cancel();
                Ok(())
            })
        }))
    }

    async fn get_thread_info(&self, thread: &ThreadId) -> Result<ThreadInfo> {
        let chat_id = Self::tg_chat(thread)?;
        let chat = self.with_retry(|| self.bot.get_chat(chat_id)).await?;
        let participant_ids = self.participant_ids(&chat).await?;

        let name = chat
            .title()
            .map(str::to_string)
            .or_else(|| chat.first_name().map(str::to_string));

        Ok(ThreadInfo {
            name,
            participant_ids,
            nicknames: HashMap::new(),
            // Not exposed by the Bot API.
            message_count: 0,
        })
    }

    async fn get_thread_history(
        &self,
        thread: &ThreadId,
        _amount: usize,
        _before_timestamp: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        Err(Error::External(format!(
            "telegram bots cannot read the history of thread {thread}"
        )))
    }

    async fn get_user_info(
        &self,
        ids: &[ParticipantId],
    ) -> Result<HashMap<ParticipantId, UserInfo>> {
        let mut out = HashMap::new();
        for id in ids {
            let Some(chat_id) = parse_chat_id(id.as_str()) else {
                tracing::debug!(participant = %id, "skipping non-numeric participant id");
                continue;
            };
            let chat = match self
                .with_retry(|| self.bot.get_chat(teloxide::types::ChatId(chat_id)))
                .await
            {
                Ok(chat) => chat,
                Err(e) => {
                    tracing::debug!(participant = %id, "user info unavailable: {e}");
                    continue;
                }
            };

            let first_name = chat.first_name().unwrap_or_default().to_string();
            let name = match chat.last_name() {
                Some(last) => format!("{first_name} {last}"),
                None => first_name.clone(),
            };
            out.insert(
                id.clone(),
                UserInfo {
                    name,
                    first_name,
                    vanity: chat.username().map(str::to_string),
                },
            );
        }
        Ok(out)
    }

    async fn get_user_id(&self, name: &str) -> Result<Vec<UserIdSearchResult>> {
        Err(Error::External(format!(
            "telegram bots cannot search users by name ({name})"
        )))
    }

    fn current_user_id(&self) -> ParticipantId {
        self.me.clone()
    }

    async fn listen(&self, sink: mpsc::UnboundedSender<ChatMessage>) -> Result<StopListening> {
        Ok(listener::spawn(self.bot.clone(), sink))
    }
}

fn parse_chat_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Splits `body` into chunks of at most `max` characters, preferring line
/// breaks as cut points.
pub fn split_message(body: &str, max: usize) -> Vec<String> {
    if body.chars().count() <= max {
        return vec![body.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in body.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
