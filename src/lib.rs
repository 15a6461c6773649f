//! DocIntel: local document workspace state plus an AI chat proxy gateway.

pub mod chat_client;
pub mod config;
pub mod credentials;
pub mod data_store;
pub mod error;
pub mod logging;
pub mod models;
pub mod providers;
pub mod server;
pub mod storage;
