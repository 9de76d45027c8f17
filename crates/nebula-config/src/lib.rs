//! Configuration for the section compile pipeline.
//!
//! Settings persist to disk as RON files, accept CLI overrides via clap, and
//! support hot-reload detection with forward/backward compatible
//! serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CompileConfig, Config, DebugConfig, MAX_WORKER_THREADS};
pub use error::ConfigError;
