//! Core types, configuration and the language-model client

pub mod cancel;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod usage;
