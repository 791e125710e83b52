// src/config/mod.rs
pub mod app;

pub use app::{AppConfig, HistoryConfig, SchedulerConfig, ServerConfig, ServiceConfig};
