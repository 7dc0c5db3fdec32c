//! Core data model.

pub mod entry;
pub mod identity;
pub mod settings;

pub use entry::{GeneratedContent, HistoryEntry, NewHistoryEntry};
pub use identity::{ApiUsage, Identity, ProfileUpdate, UserProfile, UserStats};
pub use settings::{ApiProvider, SettingField, SettingRow, SettingsRecord, TemplateParams};
