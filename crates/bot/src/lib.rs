// Huntbot process wiring
//
// The binary is a thin shell: read connection settings, build the engine,
// run the poller until ctrl-c.

pub mod settings;

pub use settings::{BotSettings, SettingsError};
