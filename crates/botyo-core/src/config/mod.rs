//! Global application configuration: a mutable tree addressed by dotted paths.

pub mod path;
pub mod yaml;

use std::path::Path;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{errors::Error, Result};

pub use path::deep_merge;

pub const CONFIG_KEY_MODULES: &str = "modules";
pub const CONFIG_KEY_CHAT_THREADS: &str = "chatThreads";
pub const CONFIG_KEY_PARTICIPANTS: &str = "participants";
pub const CONFIG_KEY_OVERRIDES: &str = "overrides";

/// Hierarchical key-value store backing every module's configuration.
///
/// Reads take a shared lock and never mutate; writes create intermediate maps.
#[derive(Debug, Default)]
pub struct ConfigStore {
    root: RwLock<Value>,
}

impl ConfigStore {
    /// Wrap an already-parsed tree. Dotted map keys are expanded into nested
    /// maps, except for participant keys.
    pub fn new(mut root: Value) -> Self {
        if root.is_null() {
            root = Value::Object(Default::default());
        }
        yaml::expand_dotted_keys(&mut root);
        Self {
            root: RwLock::new(root),
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        Ok(Self::new(yaml::parse_yaml(input)?))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingConfigFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn has(&self, property: &str) -> bool {
        self.has_at(&path::parse_path(property))
    }

    pub fn has_at<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        path::lookup(&self.root.read(), segments).is_some()
    }

    pub fn get_value(&self, property: &str) -> Result<Value> {
        self.get_value_at(&path::parse_path(property))
    }

    pub fn get_value_at<S: AsRef<str>>(&self, segments: &[S]) -> Result<Value> {
        path::lookup(&self.root.read(), segments)
            .cloned()
            .ok_or_else(|| Error::PropertyNotFound {
                path: join_segments(segments),
            })
    }

    pub fn get<T: DeserializeOwned>(&self, property: &str) -> Result<T> {
        self.get_at(&path::parse_path(property))
    }

    pub fn get_at<S: AsRef<str>, T: DeserializeOwned>(&self, segments: &[S]) -> Result<T> {
        let value = self.get_value_at(segments)?;
        serde_json::from_value(value).map_err(|e| {
            Error::Config(format!(
                "property '{}' has an unexpected type: {e}",
                join_segments(segments)
            ))
        })
    }

    /// Value at `property`, or `other` when the property is absent.
    pub fn get_or_else<T: DeserializeOwned>(&self, property: &str, other: T) -> Result<T> {
        let segments = path::parse_path(property);
        if !self.has_at(&segments) {
            return Ok(other);
        }
        self.get_at(&segments)
    }

    pub fn set<T: Serialize>(&self, property: &str, value: T) -> Result<()> {
        self.set_at(&path::parse_path(property), value)
    }

    pub fn set_at<S: AsRef<str>, T: Serialize>(&self, segments: &[S], value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        path::assign(&mut self.root.write(), segments, value);
        Ok(())
    }

    /// Snapshot of the whole tree.
    pub fn raw(&self) -> Value {
        self.root.read().clone()
    }

    /// Deep-merge `value` into the root.
    pub fn merge_raw(&self, value: &Value) {
        deep_merge(&mut self.root.write(), value);
    }

    /// Exclusive in-place access to the root.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.root.write())
    }

    /// Run `f` against the root without cloning it.
    pub fn with_raw<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.root.read())
    }
}

fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| {
            let s = s.as_ref();
            if s.contains('.') {
                format!("[{s}]")
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
        .replace(".[", "[")
}
