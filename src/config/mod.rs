//! Project configuration.
//!
//! Settings come from `<project>/.envvault.toml`; every field is
//! optional and falls back to a documented default.

pub mod settings;

pub use settings::Settings;
