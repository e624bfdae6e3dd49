//! Client protocol: message types, command dispatch and the TCP server.

pub mod dispatcher;
pub mod messages;
pub mod server;
pub mod settings;

pub use dispatcher::Dispatcher;
pub use messages::{Command, Event, ThreatAction, WatchStatus};
pub use server::{run, serve};
pub use settings::SettingsStore;
