// src/config/mod.rs

//! Engine configuration (`packflow.toml`).
//!
//! Deserialized into [`RawConfigFile`], then validated into [`ConfigFile`]
//! via `TryFrom`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, parse_config};
pub use model::{
    BackendSection, ChoicesSection, ConfigFile, EngineSection, RawConfigFile, StoreSection,
};
pub use validate::validate_against_workflow;
