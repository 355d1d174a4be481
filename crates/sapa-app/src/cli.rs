//! CLI argument definitions for the Sapa application.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sapa - a bilingual (Vietnamese/English) travel assistant for Vietnam.
#[derive(Parser, Debug)]
#[command(name = "sapa", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Interactive chat on stdin. Starts a new session unless one is given.
    Chat {
        #[arg(short = 's', long = "session")]
        session: Option<String>,
    },
    /// Ask a single question and print the answer.
    Ask {
        #[arg(short = 's', long = "session")]
        session: String,
        /// Print the full response as JSON.
        #[arg(long = "json")]
        json: bool,
        query: String,
    },
    /// List recent sessions.
    Sessions {
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Print the transcript of a session.
    History {
        #[arg(short = 's', long = "session")]
        session: String,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SAPA_CONFIG env var > ~/.sapa/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_ref(), std::env::var("SAPA_CONFIG").ok())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn resolve_config_path(flag: Option<&PathBuf>, env: Option<String>) -> PathBuf {
    if let Some(p) = flag {
        return p.clone();
    }
    if let Some(p) = env.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(p);
    }
    default_config_path()
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".sapa").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let args = CliArgs::try_parse_from([
            "sapa",
            "ask",
            "--session",
            "s1",
            "Phở ở đâu ngon?",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Ask {
                session: "s1".into(),
                json: false,
                query: "Phở ở đâu ngon?".into()
            }
        );
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "sapa",
            "sessions",
            "--limit",
            "5",
            "--config",
            "/tmp/sapa.toml",
            "-l",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.command, Command::Sessions { limit: 5 });
        assert_eq!(args.config, Some(PathBuf::from("/tmp/sapa.toml")));
        assert_eq!(args.resolve_log_level("info"), "debug");
    }

    #[test]
    fn test_parse_defaults() {
        let args = CliArgs::try_parse_from(["sapa", "chat"]).unwrap();
        assert_eq!(args.command, Command::Chat { session: None });
        assert_eq!(args.resolve_log_level("warn"), "warn");

        let args = CliArgs::try_parse_from(["sapa", "sessions"]).unwrap();
        assert_eq!(args.command, Command::Sessions { limit: 20 });
    }

    #[test]
    fn test_history_requires_session() {
        assert!(CliArgs::try_parse_from(["sapa", "history"]).is_err());
    }

    #[test]
    fn test_config_path_priority() {
        let flag = PathBuf::from("/etc/sapa.toml");
        assert_eq!(
            resolve_config_path(Some(&flag), Some("/env/sapa.toml".into())),
            flag
        );
        assert_eq!(
            resolve_config_path(None, Some("/env/sapa.toml".into())),
            PathBuf::from("/env/sapa.toml")
        );
        assert!(resolve_config_path(None, Some("  ".into())).ends_with("config.toml"));
        assert!(resolve_config_path(None, None).ends_with("config.toml"));
    }
}
