//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Section compile pipeline settings.
    pub compile: CompileConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Section compile pipeline tuning.
///
/// Zero for `worker_threads` or `buffer_pool_size` means "pick from the
/// machine"; see [`CompileConfig::resolved_worker_threads`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompileConfig {
    /// Compile worker threads (0 = one less than the CPU count).
    pub worker_threads: usize,
    /// Staging buffer packs, i.e. maximum concurrent compiles (0 = worker count).
    pub buffer_pool_size: usize,
    /// Consecutive recompiles allowed before a first-time compile must run.
    pub recompile_quota: u32,
    /// Fade-in duration after a section's first upload, in milliseconds.
    pub fade_in_ms: u64,
    /// Translucency resorts scheduled per frame at most.
    pub max_resorts_per_frame: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            buffer_pool_size: 0,
            recompile_quota: 2,
            fade_in_ms: 1000,
            max_resorts_per_frame: 15,
        }
    }
}

impl CompileConfig {
    /// Worker count with `0` resolved against the CPU count (at least 1).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }

    /// Pool size with `0` resolved to the worker count.
    pub fn resolved_buffer_pool_size(&self) -> usize {
        if self.buffer_pool_size > 0 {
            self.buffer_pool_size
        } else {
            self.resolved_worker_threads()
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Print pipeline stats every this many frames (0 = never).
    pub stats_interval_frames: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_frames: 30,
        }
    }
}

/// Upper bound on `compile.worker_threads`.
pub const MAX_WORKER_THREADS: usize = 256;

const CONFIG_FILE: &str = "config.ron";

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_err = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_err)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;

        std::fs::write(&config_path, serialized).map_err(write_err)
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compile.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::Invalid {
                field: "compile.worker_threads",
                reason: format!(
                    "{} exceeds the limit of {MAX_WORKER_THREADS}",
                    self.compile.worker_threads
                ),
            });
        }
        if self.debug.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "debug.log_level",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
