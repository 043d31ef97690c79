use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Process-level settings read from the environment.
///
/// The `modules` / `chatThreads` tree lives in the YAML file pointed to by
/// `config_path`; see [`crate::config::ConfigStore`].
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: PathBuf,
    pub telegram_bot_token: Option<String>,
    pub shutdown_grace: Duration,
}

impl Settings {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let config_path =
            env_path("BOTYO_CONFIG").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty);
        let shutdown_grace =
            Duration::from_millis(env_u64("BOTYO_SHUTDOWN_GRACE_MS").unwrap_or(2_000));

        Ok(Self {
            config_path,
            telegram_bot_token,
            shutdown_grace,
        })
    }

    pub fn require_telegram_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
