use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::mpsc;

use botyo_core::{
    chat::{Message as ChatMessage, StopListening},
    domain::{MessageId, ParticipantId, ThreadId},
};

/// Starts long polling and forwards every text (or captioned) message to `sink`.
pub fn spawn(bot: Bot, sink: mpsc::UnboundedSender<ChatMessage>) -> StopListening {
    let handler = dptree::entry().branch(Update::filter_message().endpoint(
        move |msg: Message| {
            let sink = sink.clone();
            async move {
                if let Some(message) = to_chat_message(&msg) {
                    if sink.send(message).is_err() {
                        tracing::debug!("message sink closed; dropping update");
                    }
                }
                respond(())
            }
        },
    ));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .build();
    let shutdown = dispatcher.shutdown_token();

    let task = tokio::spawn(async move {
        dispatcher.dispatch().await;
        tracing::info!("telegram polling stopped");
    });

    StopListening::new(move || {
        // Idle means polling has not started yet; there is nothing to drain.
        if shutdown.shutdown().is_err() {
            task.abort();
        }
    })
}

fn to_chat_message(msg: &Message) -> Option<ChatMessage> {
    let body = msg.text().or_else(|| msg.caption())?;
    let sender = msg.from()?;

    Some(ChatMessage {
        thread_id: ThreadId::from(msg.chat.id.0),
        sender_id: ParticipantId::new(sender.id.0.to_string()),
        message_id: MessageId::from(i64::from(msg.id.0)),
        body: body.to_string(),
        timestamp: msg.date.timestamp_millis(),
    })
}
