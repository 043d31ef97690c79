//! Chat transport abstraction. Adapters (Telegram today) implement [`port::ChatApi`].

pub mod port;
pub mod types;

pub use port::{ChatApi, StopListening, TypingIndicator};
pub use types::{Message, ThreadInfo, UserIdSearchResult, UserInfo};
