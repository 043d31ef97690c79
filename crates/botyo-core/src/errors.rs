use std::path::PathBuf;

/// Core error type.
///
/// Configuration problems are fatal at startup; everything raised while handling
/// a single message or a single scheduled run is logged and isolated by the
/// pipeline, the router or the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("property '{path}' was not found in configuration")]
    PropertyNotFound { path: String },

    #[error(
        "module '{module}' is trying to handle invalid command '{command}'{}. \
         Please check the module source or its overrides in the configuration.",
        in_thread(.thread)
    )]
    InvalidCommand {
        module: String,
        command: String,
        thread: Option<String>,
    },

    #[error(
        "module '{attempted}' is trying to register command '{command}' \
         that is already registered by '{existing}'{}",
        in_thread(.thread)
    )]
    DuplicateCommand {
        command: String,
        thread: Option<String>,
        existing: String,
        attempted: String,
    },

    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("configuration file '{}' does not exist", .0.display())]
    MissingConfigFile(PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("cancelled")]
    Cancelled,
}

fn in_thread(thread: &Option<String>) -> String {
    match thread {
        Some(t) => format!(" in chat thread '{t}'"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
