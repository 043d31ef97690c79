//! Lookups over the `chatThreads` configuration tree: thread ids, participant
//! records, names and fuzzy addressee matching.

use std::{collections::HashMap, ops::ControlFlow, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    chat::Message,
    config::{ConfigStore, CONFIG_KEY_CHAT_THREADS, CONFIG_KEY_PARTICIPANTS},
    domain::{is_numeric_key, ParticipantId, ThreadId},
};

/// Minimum Dice coefficient for an addressee match.
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

/// Participant record under `chatThreads.<t>.participants.<id-or-vanity>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vanity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl Participant {
    fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::debug!("malformed participant record: {e}");
            Participant::default()
        })
    }
}

#[derive(Clone, Debug)]
pub struct ChatThreads {
    config: Arc<ConfigStore>,
}

impl ChatThreads {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Ids of every configured chat thread.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.config.with_raw(|root| {
            root.get(CONFIG_KEY_CHAT_THREADS)
                .and_then(Value::as_object)
                .map(|threads| threads.keys().map(|k| ThreadId::new(k.as_str())).collect())
                .unwrap_or_default()
        })
    }

    pub fn is_configured(&self, thread: &ThreadId) -> bool {
        self.config
            .has_at(&[CONFIG_KEY_CHAT_THREADS, thread.as_str()])
    }

    pub fn participant(&self, thread: &ThreadId, key: &str) -> Option<Participant> {
        let segments = [CONFIG_KEY_CHAT_THREADS, thread.as_str(), CONFIG_KEY_PARTICIPANTS, key];
        self.config.with_raw(|root| {
            crate::config::path::lookup(root, &segments).map(Participant::from_value)
        })
    }

    pub fn nickname(&self, thread: &ThreadId, participant: &ParticipantId) -> Option<String> {
        self.participant(thread, participant.as_str())
            .and_then(|p| p.nickname)
    }

    /// Full name of `user`, from the first thread that knows it.
    pub fn name(&self, user: &ParticipantId) -> Option<String> {
        self.find_participant(user).and_then(|p| p.name)
    }

    pub fn first_name(&self, user: &ParticipantId) -> Option<String> {
        self.find_participant(user).and_then(|p| p.first_name)
    }

    pub fn first_name_by_message(&self, msg: &Message) -> Option<String> {
        self.participant(&msg.thread_id, msg.sender_id.as_str())
            .and_then(|p| p.first_name)
            .or_else(|| self.first_name(&msg.sender_id))
    }

    fn find_participant(&self, user: &ParticipantId) -> Option<Participant> {
        let mut found = None;
        self.for_each_participant(|_, key, participant| {
            if key == user.as_str() {
                found = Some(participant.clone());
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        found
    }

    /// Visit every participant of every configured thread until `visit` breaks.
    pub fn for_each_participant<F>(&self, mut visit: F)
    where
        F: FnMut(&ThreadId, &str, &Participant) -> ControlFlow<()>,
    {
        for (thread, participants) in self.participants_by_thread() {
            for (key, participant) in &participants {
                if visit(&thread, key, participant).is_break() {
                    return;
                }
            }
        }
    }

    fn participants_by_thread(&self) -> Vec<(ThreadId, Vec<(String, Participant)>)> {
        self.config.with_raw(|root| {
            let Some(threads) = root.get(CONFIG_KEY_CHAT_THREADS).and_then(Value::as_object) else {
                return Vec::new();
            };
            threads
                .iter()
                .map(|(id, thread)| {
                    let participants = thread
                        .get(CONFIG_KEY_PARTICIPANTS)
                        .and_then(Value::as_object)
                        .map(|ps| {
                            ps.iter()
                                .map(|(k, v)| (k.clone(), Participant::from_value(v)))
                                .collect()
                        })
                        .unwrap_or_default();
                    (ThreadId::new(id.as_str()), participants)
                })
                .collect()
        })
    }

    /// Best fuzzy match of `addressee` among the numeric-id participants of
    /// `thread`, compared against aliases, nickname, first name, name and
    /// vanity.
    pub fn participant_id_by_addressee(
        &self,
        thread: &ThreadId,
        addressee: &str,
    ) -> Option<ParticipantId> {
        let mut best: Option<(String, f64, String)> = None;

        self.for_each_participant(|current, key, participant| {
            if current != thread || !is_numeric_key(key) {
                return ControlFlow::Continue(());
            }

            let candidates = participant
                .aliases
                .iter()
                .chain(participant.nickname.iter())
                .chain(participant.first_name.iter())
                .chain(participant.name.iter())
                .chain(participant.vanity.iter());
            for candidate in candidates {
                let rating = dice_coefficient(addressee, candidate);
                if best.as_ref().map_or(rating > 0.0, |(_, max, _)| rating > *max) {
                    best = Some((key.to_string(), rating, candidate.clone()));
                }
            }
            ControlFlow::Continue(())
        });

        match best {
            Some((id, rating, matched)) if rating >= SIMILARITY_THRESHOLD => {
                tracing::debug!(addressee, matched = %matched, rating, "matched addressee");
                Some(ParticipantId::new(id))
            }
            other => {
                tracing::warn!(
                    addressee,
                    closest = other.as_ref().map(|(_, _, m)| m.as_str()).unwrap_or(""),
                    rating = other.as_ref().map_or(0.0, |(_, r, _)| *r),
                    "could not match addressee to a participant"
                );
                None
            }
        }
    }
}

/// Sørensen–Dice coefficient over character bigrams, whitespace ignored.
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = b.chars().filter(|c| !c.is_whitespace()).collect();

    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut bigrams: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *bigrams.entry((pair[0], pair[1])).or_default() += 1;
    }

    let mut intersection = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = bigrams.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    (2 * intersection) as f64 / (a.len() + b.len() - 2) as f64
}
