pub mod allergen;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod generate;
pub mod http_server;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod prompt;
pub mod registry;
pub mod sanitize;
pub mod service;
pub mod session;
pub mod trace_reporter;
pub mod wire;
