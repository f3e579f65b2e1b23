pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod utils;
