//! Configuration management for witness.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. Command-line arguments

use crate::fs_event::{EventKind, FsEventType, Recursion, WatchOptions};
use crate::witness::DEFAULT_BUFFER_EVENTS;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Watch paths configured at startup
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

/// Watcher-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of records one read buffer has room for
    #[serde(default = "default_buffer_events")]
    pub buffer_events: usize,

    /// Deliver events whose subject is a file
    #[serde(default = "default_true")]
    pub include_files: bool,

    /// Deliver events whose subject is a directory
    #[serde(default = "default_true")]
    pub include_directories: bool,

    /// Event kinds to report; empty means all
    #[serde(default)]
    pub events: Vec<EventKind>,
}

/// Watch path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Path to watch
    pub path: PathBuf,

    /// Whether to watch recursively
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Levels of sub-directories to watch when recursive (unlimited if unset)
    #[serde(default)]
    pub max_depth: Option<u32>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_events() -> usize {
    DEFAULT_BUFFER_EVENTS
}

fn default_true() -> bool {
    true
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            buffer_events: default_buffer_events(),
            include_files: true,
            include_directories: true,
            events: Vec::new(),
        }
    }
}

impl WatcherConfig {
    /// Event subjects to deliver.
    pub fn options(&self) -> WatchOptions {
        let mut options = WatchOptions::empty();
        options.set(WatchOptions::FILE, self.include_files);
        options.set(WatchOptions::DIRECTORY, self.include_directories);
        options
    }

    pub fn event_types(&self) -> FsEventType {
        EventKind::union(&self.events)
    }
}

impl WatchConfig {
    pub fn recursion(&self) -> Recursion {
        match (self.recursive, self.max_depth) {
            (false, _) => Recursion::None,
            (true, Some(depth)) => Recursion::WithDepth(depth),
            (true, None) => Recursion::Unlimited,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Add config file if provided
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("/etc/witness/config.toml"),
                dirs::config_dir()
                    .unwrap_or_default()
                    .join("witness/config.toml"),
            ];

            for path in &default_paths {
                if path.exists() {
                    figment = figment.merge(Toml::file(path));
                    break;
                }
            }
        }

        // Environment variables (WITNESS_ prefix, `__` separates sections)
        figment = figment.merge(Env::prefixed("WITNESS_").split("__"));

        figment.extract()
    }

    /// Override log level from CLI
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        if let Some(level) = log_level {
            self.watcher.log_level = level;
        }
        self
    }

    /// Override event kinds from CLI
    pub fn with_events(mut self, events: Vec<EventKind>) -> Self {
        if !events.is_empty() {
            self.watcher.events = events;
        }
        self
    }

    /// Restrict delivered subjects from CLI
    pub fn with_subjects(mut self, files_only: bool, dirs_only: bool) -> Self {
        if files_only {
            self.watcher.include_files = true;
            self.watcher.include_directories = false;
        } else if dirs_only {
            self.watcher.include_files = false;
            self.watcher.include_directories = true;
        }
        self
    }
}
