//! Effective module configuration for a (thread, participant) context.
//!
//! Three layers, lowest precedence first:
//! 1. `modules.<Module>`
//! 2. `chatThreads.<thread>.overrides.modules.<Module>`
//! 3. `chatThreads.<thread>.participants.<participant>.overrides.modules.<Module>`
//!
//! Maps merge recursively; scalars and sequences from a higher layer win.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    config::{
        deep_merge, path, ConfigStore, CONFIG_KEY_CHAT_THREADS, CONFIG_KEY_MODULES,
        CONFIG_KEY_OVERRIDES, CONFIG_KEY_PARTICIPANTS,
    },
    domain::{ParticipantId, ThreadId},
    errors::Error,
    Result,
};

pub const CONFIG_KEY_ENABLE: &str = "enable";

/// Which override layers apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    ChatThread(ThreadId),
    Participant(ThreadId, ParticipantId),
}

impl Scope {
    pub fn of(thread: &ThreadId, participant: Option<&ParticipantId>) -> Self {
        match participant {
            Some(p) => Scope::Participant(thread.clone(), p.clone()),
            None => Scope::ChatThread(thread.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContextResolver {
    store: Arc<ConfigStore>,
}

impl ContextResolver {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Merged configuration subtree of `module` in `scope`.
    pub fn scoped(&self, module: &str, scope: &Scope) -> ScopedConfig {
        let value = self.store.with_raw(|root| merge_layers(root, module, scope));
        ScopedConfig {
            module: module.to_string(),
            value,
        }
    }

    /// The merged module subtree, without a property filter. `Null` when no
    /// layer mentions the module.
    pub fn resolve_raw(
        &self,
        module: &str,
        thread: &ThreadId,
        participant: Option<&ParticipantId>,
    ) -> Value {
        self.scoped(module, &Scope::of(thread, participant)).value
    }

    pub fn resolve<T: DeserializeOwned>(
        &self,
        module: &str,
        thread: &ThreadId,
        participant: Option<&ParticipantId>,
        property: &str,
    ) -> Result<T> {
        self.scoped(module, &Scope::of(thread, participant))
            .get(property)
    }

    pub fn resolve_or_else<T: DeserializeOwned>(
        &self,
        module: &str,
        thread: &ThreadId,
        participant: Option<&ParticipantId>,
        property: &str,
        other: T,
    ) -> Result<T> {
        self.scoped(module, &Scope::of(thread, participant))
            .get_or_else(property, other)
    }

    pub fn is_enabled(
        &self,
        module: &str,
        thread: &ThreadId,
        participant: Option<&ParticipantId>,
    ) -> bool {
        self.scoped(module, &Scope::of(thread, participant))
            .is_enabled()
    }

    /// Write `property` into the override layer that `scope` names.
    pub fn set_in_scope<T: Serialize>(
        &self,
        module: &str,
        scope: &Scope,
        property: &str,
        value: T,
    ) -> Result<()> {
        let mut segments = scope_prefix(scope);
        segments.push(CONFIG_KEY_MODULES.to_string());
        segments.push(module.to_string());
        segments.extend(path::parse_path(property));
        self.store.set_at(&segments, value)
    }
}

fn scope_prefix(scope: &Scope) -> Vec<String> {
    match scope {
        Scope::Global => Vec::new(),
        Scope::ChatThread(thread) => vec![
            CONFIG_KEY_CHAT_THREADS.to_string(),
            thread.0.clone(),
            CONFIG_KEY_OVERRIDES.to_string(),
        ],
        Scope::Participant(thread, participant) => vec![
            CONFIG_KEY_CHAT_THREADS.to_string(),
            thread.0.clone(),
            CONFIG_KEY_PARTICIPANTS.to_string(),
            participant.0.clone(),
            CONFIG_KEY_OVERRIDES.to_string(),
        ],
    }
}

fn module_layer<'a>(root: &'a Value, module: &str, scope: &Scope) -> Option<&'a Value> {
    let mut segments = scope_prefix(scope);
    segments.push(CONFIG_KEY_MODULES.to_string());
    segments.push(module.to_string());
    path::lookup(root, &segments)
}

fn merge_layers(root: &Value, module: &str, scope: &Scope) -> Value {
    let mut layers = vec![module_layer(root, module, &Scope::Global)];
    match scope {
        Scope::Global => {}
        Scope::ChatThread(_) => layers.push(module_layer(root, module, scope)),
        Scope::Participant(thread, _) => {
            layers.push(module_layer(root, module, &Scope::ChatThread(thread.clone())));
            layers.push(module_layer(root, module, scope));
        }
    }

    let mut merged = Value::Null;
    for layer in layers.into_iter().flatten() {
        if merged.is_null() {
            merged = layer.clone();
        } else {
            deep_merge(&mut merged, layer);
        }
    }
    merged
}

/// A module's configuration as seen from one context.
#[derive(Clone, Debug)]
pub struct ScopedConfig {
    module: String,
    value: Value,
}

impl ScopedConfig {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn has(&self, property: &str) -> bool {
        path::lookup(&self.value, &path::parse_path(property)).is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, property: &str) -> Result<T> {
        let value = path::lookup(&self.value, &path::parse_path(property)).ok_or_else(|| {
            Error::PropertyNotFound {
                path: self.full_path(property),
            }
        })?;
        T::deserialize(value).map_err(|e| {
            Error::Config(format!(
                "property '{}' has an unexpected type: {e}",
                self.full_path(property)
            ))
        })
    }

    pub fn get_or_else<T: DeserializeOwned>(&self, property: &str, other: T) -> Result<T> {
        if !self.has(property) {
            return Ok(other);
        }
        self.get(property)
    }

    /// `enable` property, `true` when absent.
    pub fn is_enabled(&self) -> bool {
        match self.get_or_else(CONFIG_KEY_ENABLE, true) {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!(module = %self.module, "ignoring malformed enable flag: {e}");
                true
            }
        }
    }

    fn full_path(&self, property: &str) -> String {
        format!("{CONFIG_KEY_MODULES}.{}.{property}", self.module)
    }
}
