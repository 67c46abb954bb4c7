//! Configuration module for the quiz server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. The quiz script
//! comes from a standalone quiz file, the `[quiz]` section of the config
//! file, or the built-in script, in that order.

use crate::quiz::{QuizItem, QuizScript};
use crate::websocket::{WsOptions, DEFAULT_MAX_MESSAGE_SIZE};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the quiz server
#[derive(Parser, Debug)]
#[command(name = "quizsock")]
#[command(author = "quizsock authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket quiz server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9001)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Path to a TOML quiz file with [[questions]] entries
    #[arg(short = 'q', long)]
    pub quiz: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Concurrent session cap
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Seconds allowed for the WebSocket handshake; unlimited if unset
    pub handshake_timeout_secs: Option<u64>,
    /// Largest inbound message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            handshake_timeout_secs: None,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Quiz content, either inline in the config file or in a quiz file
#[derive(Debug, Deserialize)]
pub struct QuizConfig {
    /// Whether answers must match letter case exactly
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub questions: Vec<QuizItem>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            case_sensitive: default_case_sensitive(),
            questions: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9001".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_case_sensitive() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub backlog: i32,
    pub handshake_timeout: Option<Duration>,
    pub max_message_size: usize,
    pub log_level: String,
    pub script: Arc<QuizScript>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML files.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref path) => read_toml(path)?,
            None => TomlConfig::default(),
        };

        let quiz_file = match cli.quiz {
            Some(ref path) => Some(read_toml(path)?),
            None => None,
        };

        Self::resolve(cli, toml_config, quiz_file)
    }

    /// Merge the configuration sources and validate the result.
    pub fn resolve(
        cli: CliArgs,
        toml_config: TomlConfig,
        quiz_file: Option<QuizConfig>,
    ) -> Result<Self, ConfigError> {
        let listen_str = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidListen(listen_str.clone(), e))?;

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if toml_config.server.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be at least 1"));
        }

        let script = match quiz_file {
            Some(file) => build_script(file)?,
            None if toml_config.quiz.questions.is_empty() => QuizScript::new(
                QuizScript::builtin().items().to_vec(),
                toml_config.quiz.case_sensitive,
            ),
            None => build_script(toml_config.quiz)?,
        };

        Ok(Config {
            listen,
            workers: cli.workers.or(toml_config.server.workers).filter(|&n| n > 0),
            max_connections,
            backlog: toml_config.server.backlog,
            handshake_timeout: toml_config
                .server
                .handshake_timeout_secs
                .map(Duration::from_secs),
            max_message_size: toml_config.server.max_message_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            script: Arc::new(script),
        })
    }

    /// WebSocket settings applied to every accepted connection.
    pub fn ws_options(&self) -> WsOptions {
        WsOptions {
            max_message_size: self.max_message_size,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

fn build_script(quiz: QuizConfig) -> Result<QuizScript, ConfigError> {
    if quiz.questions.is_empty() {
        return Err(ConfigError::EmptyScript);
    }
    if let Some(pos) = quiz.questions.iter().position(|q| q.prompt.trim().is_empty()) {
        return Err(ConfigError::EmptyPrompt(pos + 1));
    }
    Ok(QuizScript::new(quiz.questions, quiz.case_sensitive))
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid listen address '{0}': {1}")]
    InvalidListen(String, #[source] AddrParseError),

    #[error("Quiz script has no questions")]
    EmptyScript,

    #[error("Quiz question {0} has an empty prompt")]
    EmptyPrompt(usize),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("quizsock").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:9001");
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.server.handshake_timeout_secs, None);
        assert!(config.quiz.case_sensitive);
        assert!(config.quiz.questions.is_empty());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9001"
            workers = 4
            handshake_timeout_secs = 10

            [quiz]
            case_sensitive = false

            [[quiz.questions]]
            prompt = "Largest planet?"
            answer = "Jupiter"

            [[quiz.questions]]
            prompt = "Smallest prime?"
            expected_answer = "2"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9001");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.handshake_timeout_secs, Some(10));
        assert!(!config.quiz.case_sensitive);
        assert_eq!(config.quiz.questions.len(), 2);
        assert_eq!(config.quiz.questions[1].answer, "2");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_builtin_script_by_default() {
        let config = Config::resolve(cli(&[]), TomlConfig::default(), None).unwrap();
        assert_eq!(*config.script, QuizScript::builtin());
        assert_eq!(config.listen, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.handshake_timeout, None);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let mut toml_config = TomlConfig::default();
        toml_config.server.listen = "0.0.0.0:7000".to_string();
        toml_config.server.workers = Some(2);
        toml_config.logging.level = "warn".to_string();

        let config = Config::resolve(
            cli(&["-l", "127.0.0.1:8000", "-w", "8", "--log-level", "trace"]),
            toml_config,
            None,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 8000);
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_toml_log_level_used_when_cli_default() {
        let mut toml_config = TomlConfig::default();
        toml_config.logging.level = "debug".to_string();

        let config = Config::resolve(cli(&[]), toml_config, None).unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_quiz_file_overrides_inline_questions() {
        let mut toml_config = TomlConfig::default();
        toml_config.quiz.questions = vec![QuizItem::new("inline", "x")];

        let quiz_file: QuizConfig = toml::from_str(
            r#"
            [[questions]]
            prompt = "from file"
            answer = "y"
            "#,
        )
        .unwrap();

        let config = Config::resolve(cli(&[]), toml_config, Some(quiz_file)).unwrap();
        assert_eq!(config.script.len(), 1);
        assert_eq!(config.script.items()[0].prompt, "from file");
        assert!(config.script.case_sensitive());
    }

    #[test]
    fn test_empty_quiz_file_rejected() {
        let quiz_file = QuizConfig::default();
        let err = Config::resolve(cli(&[]), TomlConfig::default(), Some(quiz_file)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyScript));
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let mut toml_config = TomlConfig::default();
        toml_config.quiz.questions = vec![QuizItem::new("ok", "a"), QuizItem::new("  ", "b")];

        let err = Config::resolve(cli(&[]), toml_config, None).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPrompt(2)));
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let err = Config::resolve(cli(&["-l", "not-an-address"]), TomlConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(..)));
    }

    #[test]
    fn test_zero_workers_means_default() {
        let config = Config::resolve(cli(&["-w", "0"]), TomlConfig::default(), None).unwrap();
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_missing_config_file() {
        let err = read_toml::<TomlConfig>(Path::new("/nonexistent/quizsock.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
