pub mod app;
pub mod blob;
pub mod classify;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod model;
pub mod persist;
pub mod store;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
