//! CLI argument definitions for logminer-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use logminer_core::config::LogminerConfig;

/// Logminer log mining daemon.
///
/// Replays persisted and on-disk extraction rules at boot, runs one
/// directory-watching worker per enabled rule, and flushes every file
/// offset on shutdown.
#[derive(Parser, Debug)]
#[command(name = "logminer-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logminer.toml configuration file.
    #[arg(short, long, default_value = "/etc/logminer/logminer.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the rules directory loaded at boot.
    #[arg(long)]
    pub rules_dir: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply CLI overrides on top of an already-loaded configuration.
    pub fn apply_overrides(&self, config: &mut LogminerConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(dir) = &self.rules_dir {
            config.general.rules_dir = dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_system_config() {
        let cli = DaemonCli::parse_from(["logminer-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/logminer/logminer.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "logminer-daemon",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--rules-dir",
            "/tmp/rules",
        ]);
        let mut config = LogminerConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.rules_dir, "/tmp/rules");
    }
}
