//! Resolves participant records against the chat transport and writes the
//! results back into the `chatThreads` configuration tree.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{
    chat::ChatApi,
    config::{deep_merge, ConfigStore, CONFIG_KEY_CHAT_THREADS, CONFIG_KEY_PARTICIPANTS},
    domain::{is_numeric_key, ParticipantId, ThreadId},
    Result,
};

pub struct ParticipantsResolver {
    chat: Arc<dyn ChatApi>,
    config: Arc<ConfigStore>,
    vanity_cache: Mutex<HashMap<String, ParticipantId>>,
}

impl ParticipantsResolver {
    pub fn new(chat: Arc<dyn ChatApi>, config: Arc<ConfigStore>) -> Self {
        Self {
            chat,
            config,
            vanity_cache: Mutex::new(HashMap::new()),
        }
    }

    /// All three resolution steps, in order.
    pub async fn resolve(&self) -> Result<()> {
        self.resolve_declared_vanity_names().await?;
        self.populate_actual_participants().await?;
        self.populate_participants_info().await
    }

    /// Copy records declared under a vanity key to the numeric id of that user.
    pub async fn resolve_declared_vanity_names(&self) -> Result<()> {
        for (thread, key) in self.participant_keys() {
            if is_numeric_key(&key) {
                continue;
            }

            let Some(user_id) = self.user_id_of_vanity(&key).await? else {
                continue;
            };

            self.config.update(|root| {
                let Some(participants) = participants_mut(root, &thread) else {
                    return;
                };
                let Some(record) = participants.get(&key).cloned() else {
                    return;
                };
                match participants.get_mut(user_id.as_str()) {
                    Some(existing) => deep_merge(existing, &record),
                    None => {
                        participants.insert(user_id.to_string(), record);
                    }
                }
            });
        }
        Ok(())
    }

    async fn user_id_of_vanity(&self, vanity: &str) -> Result<Option<ParticipantId>> {
        if let Some(id) = self.vanity_cache.lock().get(vanity) {
            return Ok(Some(id.clone()));
        }

        let results: Vec<_> = match self.chat.get_user_id(vanity).await {
            Ok(results) => results.into_iter().filter(|r| r.is_user()).collect(),
            Err(e) => {
                tracing::warn!(vanity, "could not look up vanity name: {e}");
                return Ok(None);
            }
        };

        let Some(first) = results.first() else {
            tracing::warn!(
                vanity,
                "no user found for vanity name; its configuration will not be applied"
            );
            return Ok(None);
        };
        if results.len() > 1 {
            let candidates: Vec<String> = results
                .iter()
                .map(|r| format!("{} ({})", r.user_id, r.profile_url.as_deref().unwrap_or("-")))
                .collect();
            tracing::warn!(
                vanity,
                assumed = %first.user_id,
                candidates = ?candidates,
                "several users match vanity name; use a numeric id to disambiguate"
            );
        }

        tracing::debug!(vanity, user = %first.user_id, "resolved vanity name");
        self.vanity_cache
            .lock()
            .insert(vanity.to_string(), first.user_id.clone());
        Ok(Some(first.user_id.clone()))
    }

    /// Record the thread name, every actual participant and their nicknames.
    pub async fn populate_actual_participants(&self) -> Result<()> {
        for thread in self.thread_ids() {
            let info = match self.chat.get_thread_info(&thread).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(
                        thread = %thread,
                        current_user = %self.chat.current_user_id(),
                        "could not get chat thread info; is the current user a participant? {e}"
                    );
                    continue;
                }
            };

            self.config.update(|root| {
                let Some(thread_obj) = thread_mut(root, &thread) else {
                    return;
                };
                match info.name.as_deref().filter(|n| !n.is_empty()) {
                    Some(name) => {
                        thread_obj.insert("name".into(), Value::String(name.to_string()));
                    }
                    None => {
                        thread_obj.remove("name");
                    }
                }

                let participants = ensure_object(
                    thread_obj
                        .entry(CONFIG_KEY_PARTICIPANTS)
                        .or_insert_with(|| Value::Object(Map::new())),
                );
                for id in &info.participant_ids {
                    participants
                        .entry(id.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                }
                for (id, nickname) in &info.nicknames {
                    let record = ensure_object(
                        participants
                            .entry(id.to_string())
                            .or_insert_with(|| Value::Object(Map::new())),
                    );
                    record.insert("nickname".into(), Value::String(nickname.clone()));
                }
            });
        }
        Ok(())
    }

    /// Fill `id`, `name`, `firstName` and `vanity` of numeric-id participants;
    /// also store the record under its vanity key.
    pub async fn populate_participants_info(&self) -> Result<()> {
        let mut ids: Vec<ParticipantId> = self
            .participant_keys()
            .into_iter()
            .filter(|(_, key)| is_numeric_key(key))
            .map(|(_, key)| ParticipantId::new(key))
            .collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let infos = match self.chat.get_user_info(&ids).await {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(participants = ids.len(), "could not get participant info: {e}");
                return Ok(());
            }
        };

        self.config.update(|root| {
            let Some(threads) = root
                .get_mut(CONFIG_KEY_CHAT_THREADS)
                .and_then(Value::as_object_mut)
            else {
                return;
            };

            for (thread_id, thread) in threads.iter_mut() {
                let Some(participants) = thread
                    .get_mut(CONFIG_KEY_PARTICIPANTS)
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };

                let numeric: Vec<String> = participants
                    .keys()
                    .filter(|k| is_numeric_key(k))
                    .cloned()
                    .collect();
                for id in numeric {
                    let Some(info) = infos.get(&ParticipantId::new(id.as_str())) else {
                        tracing::info!(thread = %thread_id, participant = %id, "no info for participant");
                        continue;
                    };

                    let Some(record) = participants.get_mut(&id) else {
                        continue;
                    };
                    let record = ensure_object(record);
                    record.insert("id".into(), Value::String(id.clone()));
                    record.insert("name".into(), Value::String(info.name.clone()));
                    record.insert("firstName".into(), Value::String(info.first_name.clone()));
                    match info.vanity.as_deref() {
                        Some(vanity) => {
                            record.insert("vanity".into(), Value::String(vanity.to_string()));
                        }
                        None => {
                            record.remove("vanity");
                        }
                    }
                    let record = Value::Object(record.clone());

                    tracing::debug!(
                        participant = %id,
                        name = %info.name,
                        vanity = info.vanity.as_deref().unwrap_or(""),
                        "participant info populated"
                    );

                    if let Some(vanity) = info.vanity.as_deref().filter(|v| !v.is_empty()) {
                        participants.insert(vanity.to_string(), record);
                    }
                }
            }
        });
        Ok(())
    }

    fn thread_ids(&self) -> Vec<ThreadId> {
        self.config.with_raw(|root| {
            root.get(CONFIG_KEY_CHAT_THREADS)
                .and_then(Value::as_object)
                .map(|m| m.keys().map(|k| ThreadId::new(k.as_str())).collect())
                .unwrap_or_default()
        })
    }

    fn participant_keys(&self) -> Vec<(ThreadId, String)> {
        self.config.with_raw(|root| {
            let Some(threads) = root.get(CONFIG_KEY_CHAT_THREADS).and_then(Value::as_object) else {
                return Vec::new();
            };
            threads
                .iter()
                .flat_map(|(thread, obj)| {
                    obj.get(CONFIG_KEY_PARTICIPANTS)
                        .and_then(Value::as_object)
                        .into_iter()
                        .flat_map(|ps| ps.keys())
                        .map(move |key| (ThreadId::new(thread.as_str()), key.clone()))
                })
                .collect()
        })
    }
}

fn thread_mut<'a>(root: &'a mut Value, thread: &ThreadId) -> Option<&'a mut Map<String, Value>> {
    let thread_value = root
        .get_mut(CONFIG_KEY_CHAT_THREADS)?
        .as_object_mut()?
        .get_mut(thread.as_str())?;
    Some(ensure_object(thread_value))
}

fn participants_mut<'a>(
    root: &'a mut Value,
    thread: &ThreadId,
) -> Option<&'a mut Map<String, Value>> {
    thread_mut(root, thread)?
        .get_mut(CONFIG_KEY_PARTICIPANTS)?
        .as_object_mut()
}

/// Empty YAML nodes (`"100":`) load as null; treat them as empty maps.
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::{ThreadInfo, UserIdSearchResult, UserInfo},
        test_support::FakeChat,
    };
    use serde_json::json;

    fn setup(config: Value) -> (Arc<FakeChat>, Arc<ConfigStore>, ParticipantsResolver) {
        let chat = Arc::new(FakeChat::new());
        let store = Arc::new(ConfigStore::new(config));
        let resolver = ParticipantsResolver::new(chat.clone(), store.clone());
        (chat, store, resolver)
    }

    #[tokio::test]
    async fn vanity_declared_overrides_reach_the_numeric_id() {
        let (chat, store, resolver) = setup(json!({
            "chatThreads": {"100": {"participants": {
                "john.doe": {"overrides": {"modules": {"Ping": {"enable": false}}}},
            }}},
        }));
        chat.add_user_search("john.doe", vec![
            UserIdSearchResult {
                user_id: ParticipantId::from("1"),
                name: "John Doe".into(),
                profile_url: None,
                kind: "user".into(),
            },
        ]);

        resolver.resolve_declared_vanity_names().await.unwrap();

        assert_eq!(
            store
                .get_at::<_, bool>(&["chatThreads", "100", "participants", "1", "overrides", "modules", "Ping", "enable"])
                .unwrap(),
            false
        );
        // vanity key stays a single key
        assert!(store.has_at(&["chatThreads", "100", "participants", "john.doe"]));

        // second pass is served from the cache
        resolver.resolve_declared_vanity_names().await.unwrap();
        assert_eq!(chat.user_searches(), 1);
    }

    #[tokio::test]
    async fn unknown_vanity_is_skipped() {
        let (_chat, store, resolver) = setup(json!({
            "chatThreads": {"100": {"participants": {"ghost": {"nickname": "boo"}}}},
        }));
        resolver.resolve_declared_vanity_names().await.unwrap();
        let participants = store.get_value_at(&["chatThreads", "100", "participants"]).unwrap();
        assert_eq!(participants, json!({"ghost": {"nickname": "boo"}}));
    }

    #[tokio::test]
    async fn thread_info_and_user_info_are_written_back() {
        let (chat, store, resolver) = setup(json!({
            "chatThreads": {"100": null, "200": {}},
        }));
        chat.set_thread_info(
            "100",
            ThreadInfo {
                name: Some("Friends".into()),
                participant_ids: vec![ParticipantId::from("1"), ParticipantId::from("2")],
                nicknames: [(ParticipantId::from("2"), "Janie".to_string())].into_iter().collect(),
                message_count: 0,
            },
        );
        chat.set_user_info(
            "1",
            UserInfo {
                name: "John Doe".into(),
                first_name: "John".into(),
                vanity: Some("john.doe".into()),
            },
        );
        chat.set_user_info(
            "2",
            UserInfo {
                name: "Jane Roe".into(),
                first_name: "Jane".into(),
                vanity: None,
            },
        );

        resolver.resolve().await.unwrap();

        assert_eq!(store.get::<String>("chatThreads.100.name").unwrap(), "Friends");
        assert_eq!(
            store.get_value_at(&["chatThreads", "100", "participants", "john.doe"]).unwrap(),
            json!({"id": "1", "name": "John Doe", "firstName": "John", "vanity": "john.doe"})
        );
        assert_eq!(
            store.get_value_at(&["chatThreads", "100", "participants", "2"]).unwrap(),
            json!({"id": "2", "name": "Jane Roe", "firstName": "Jane", "nickname": "Janie"})
        );
        // thread 200 is unknown to the transport and left untouched
        assert_eq!(store.get_value("chatThreads.200").unwrap(), json!({}));
    }
}
