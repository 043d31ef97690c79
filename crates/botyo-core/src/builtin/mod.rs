//! Modules every bot registers.

pub mod error_handler;
pub mod help;
pub mod participants_updater;
pub mod thread_filter;

pub use error_handler::FriendlyCommandErrorHandler;
pub use help::HelpCommand;
pub use participants_updater::ChatThreadParticipantsUpdaterTask;
pub use thread_filter::ChatThreadFilter;
