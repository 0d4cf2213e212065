// Settings module
// Versioned configuration record, its migration and its persistence

pub mod backend;
pub mod migration;
#[allow(clippy::module_inception)]
pub mod settings;
pub mod store;

pub use backend::{JsonFileBackend, MemoryBackend, SettingsBackend, SqliteBackend};
pub use migration::{migrate_value, MigrationReport, CURRENT_CONFIG_VERSION};
pub use settings::{AutoSwitchMode, PlayMode, Settings};
pub use store::{SettingsError, SettingsStore, EXTENSION_KEY};
