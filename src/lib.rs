pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod error;
pub mod logging;
pub mod store;
pub mod web;
