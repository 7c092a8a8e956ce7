#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod runtime;
pub mod telemetry;

pub use cli::Cli;
