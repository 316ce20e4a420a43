use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use env_logger::{Builder, Target, WriteStyle};
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};

/// Available logging subsystems in plexfm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoggingSubsystem {
    /// Main application logging
    #[serde(rename = "main")]
    Main,
    /// Webhook endpoint and API server
    #[serde(rename = "api")]
    Api,
    /// Payload normalization
    #[serde(rename = "webhook")]
    Webhook,
    /// Event routing
    #[serde(rename = "dispatch")]
    Dispatch,
    /// Last.fm client and session handling
    #[serde(rename = "lastfm")]
    Lastfm,
    /// Configuration loading and parsing
    #[serde(rename = "config")]
    Config,
    /// Third-party dependencies
    #[serde(rename = "deps")]
    Dependencies,
}

impl LoggingSubsystem {
    /// Get the module prefix for this subsystem
    pub fn module_prefix(&self) -> &'static str {
        match self {
            LoggingSubsystem::Main => "plexfm",
            LoggingSubsystem::Api => "plexfm::api",
            LoggingSubsystem::Webhook => "plexfm::webhook",
            LoggingSubsystem::Dispatch => "plexfm::dispatch",
            LoggingSubsystem::Lastfm => "plexfm::helpers::lastfm,plexfm::session",
            LoggingSubsystem::Config => "plexfm::config",
            LoggingSubsystem::Dependencies => "rocket,ureq",
        }
    }

    fn parse(name: &str) -> Option<LoggingSubsystem> {
        match name.to_lowercase().as_str() {
            "main" => Some(LoggingSubsystem::Main),
            "api" => Some(LoggingSubsystem::Api),
            "webhook" => Some(LoggingSubsystem::Webhook),
            "dispatch" => Some(LoggingSubsystem::Dispatch),
            "lastfm" => Some(LoggingSubsystem::Lastfm),
            "config" => Some(LoggingSubsystem::Config),
            "deps" | "dependencies" => Some(LoggingSubsystem::Dependencies),
            _ => None,
        }
    }
}

/// Logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Target for log output (stdout, stderr)
    #[serde(default = "default_target")]
    pub target: String,

    /// Whether to include timestamps
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,

    /// Whether to use colored output
    #[serde(default = "default_colors")]
    pub colors: bool,

    /// Subsystem-specific log levels; keys are subsystem names or raw
    /// module paths
    #[serde(default)]
    pub subsystems: HashMap<String, String>,

    /// Whether to include module paths in log output
    #[serde(default)]
    pub include_module_path: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_target() -> String {
    "stdout".to_string()
}

fn default_timestamps() -> bool {
    true
}

fn default_colors() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            target: default_target(),
            timestamps: default_timestamps(),
            colors: default_colors(),
            subsystems: HashMap::new(),
            include_module_path: false,
        }
    }
}

impl LoggingConfig {
    /// Load logging configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read logging config file: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse logging config: {}", e))
    }

    /// Convert string log level to LevelFilter
    fn parse_log_level(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => {
                eprintln!("Warning: Unknown log level '{}', defaulting to 'info'", level);
                LevelFilter::Info
            }
        }
    }

    /// Initialize the logger with this configuration
    pub fn initialize_logger(&self) -> Result<(), String> {
        let mut builder = Builder::new();

        builder.parse_env("RUST_LOG");
        builder.filter(None, Self::parse_log_level(&self.level));

        for (subsystem_name, level) in &self.subsystems {
            let level_filter = Self::parse_log_level(level);
            match LoggingSubsystem::parse(subsystem_name) {
                Some(subsystem) => {
                    for prefix in subsystem.module_prefix().split(',') {
                        builder.filter(Some(prefix.trim()), level_filter);
                    }
                }
                // Allow custom module specifications
                None => {
                    builder.filter(Some(subsystem_name), level_filter);
                }
            }
        }

        builder.write_style(if self.colors {
            WriteStyle::Auto
        } else {
            WriteStyle::Never
        });

        match self.target.to_lowercase().as_str() {
            "stdout" => {
                builder.target(Target::Stdout);
            }
            "stderr" => {
                builder.target(Target::Stderr);
            }
            _ => {
                return Err(format!("Unknown logging target: {}", self.target));
            }
        }

        let timestamps = self.timestamps;
        let include_module_path = self.include_module_path;

        builder.format(move |buf, record| {
            let mut output = String::new();

            if timestamps {
                output.push_str(&format!(
                    "[{}] ",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
                ));
            }

            output.push_str(&format!("[{}] ", record.level()));

            if include_module_path {
                if let Some(module) = record.module_path() {
                    output.push_str(&format!("[{}] ", module));
                }
            }

            output.push_str(&format!("{}", record.args()));

            writeln!(buf, "{}", output)
        });

        builder
            .try_init()
            .map_err(|e| format!("Failed to initialize logger: {}", e))?;

        Ok(())
    }
}

/// Initialize logging from command line arguments and optional config file
pub fn initialize_logging_with_args(args: &[String], config_file: Option<&Path>) -> Result<(), String> {
    let debug_mode = args.iter().any(|arg| arg == "--debug" || arg == "-d");
    let verbose_mode = args.iter().any(|arg| arg == "--verbose" || arg == "-v");

    let mut config = if let Some(config_path) = config_file {
        if config_path.exists() {
            LoggingConfig::from_file(config_path)?
        } else {
            return Err(format!("Logging config file {:?} not found", config_path));
        }
    } else {
        LoggingConfig::default()
    };

    if debug_mode || verbose_mode {
        config.level = "debug".to_string();
    }

    config.initialize_logger()?;

    if debug_mode || verbose_mode {
        info!("Debug logging enabled via command line");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.target, "stdout");
        assert!(config.timestamps);
    }

    #[test]
    fn test_parse_log_level_falls_back_to_info() {
        assert_eq!(LoggingConfig::parse_log_level("nonsense"), LevelFilter::Info);
        assert_eq!(LoggingConfig::parse_log_level("TRACE"), LevelFilter::Trace);
    }

    #[test]
    fn test_subsystem_names_resolve_to_module_prefixes() {
        let subsystem = LoggingSubsystem::parse("lastfm").unwrap();
        assert!(subsystem.module_prefix().contains("plexfm::helpers::lastfm"));
        assert!(LoggingSubsystem::parse("unknown").is_none());
    }
}
