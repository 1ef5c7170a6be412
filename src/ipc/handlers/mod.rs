pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod quick_links;
pub mod uworld_analytics;
pub mod uworld_import;
pub mod uworld_logs;
pub mod uworld_settings;
