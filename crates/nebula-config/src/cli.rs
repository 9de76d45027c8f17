//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Section pipeline command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-demo", about = "Section compile pipeline demo")]
pub struct CliArgs {
    /// Compile worker threads (0 = auto).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Staging buffer packs (0 = one per worker).
    #[arg(long)]
    pub buffer_pool_size: Option<usize>,

    /// Consecutive recompiles allowed before a first-time compile.
    #[arg(long)]
    pub recompile_quota: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Demo world radius in sections.
    #[arg(long, default_value_t = 2)]
    pub radius: i32,

    /// Frames to simulate.
    #[arg(long, default_value_t = 120)]
    pub frames: u32,

    /// Upload through a wgpu device instead of host memory.
    #[arg(long)]
    pub gpu: bool,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(workers) = args.workers {
            self.compile.worker_threads = workers;
        }
        if let Some(size) = args.buffer_pool_size {
            self.compile.buffer_pool_size = size;
        }
        if let Some(quota) = args.recompile_quota {
            self.compile.recompile_quota = quota;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            workers: Some(6),
            recompile_quota: Some(0),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.compile.worker_threads, 6);
        assert_eq!(config.compile.recompile_quota, 0);
        // Non-overridden fields retain defaults
        assert_eq!(config.compile.buffer_pool_size, 0);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from(["nebula-demo", "--workers", "2", "--gpu", "--radius", "3"]);
        assert_eq!(args.workers, Some(2));
        assert!(args.gpu);
        assert_eq!(args.radius, 3);
        assert_eq!(args.frames, 120);
    }
}
