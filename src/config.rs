//! Shell configuration, merged from command-line flags and the environment.

use std::path::{Component, PathBuf};

use tracing::Level;

use crate::cli::{CliArgs, LogLevel};
use crate::env::Environment;

/// Environment variable consulted for the log level when `--log-level` is absent.
pub const LOG_ENV: &str = "JOBSH_LOG";

/// Environment variable consulted for the prompt when `--prompt` is absent.
pub const PROMPT_ENV: &str = "JOBSH_PROMPT";

pub const DEFAULT_PROMPT: &str = "{user}:{dir}$ ";

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Prompt template, see [`ShellConfig::render_prompt`].
    pub prompt: String,
    pub log_level: Level,
    /// Requested job control; it is only honoured when stdin is a terminal.
    pub job_control: bool,
    pub history_file: Option<PathBuf>,
    /// `-c`: a single line to run instead of the interactive loop.
    pub command: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            log_level: Level::WARN,
            job_control: true,
            history_file: None,
            command: None,
        }
    }
}

impl ShellConfig {
    /// Flags first, then the process environment, then defaults.
    pub fn from_args(args: CliArgs) -> Self {
        Self::from_sources(args, |key| std::env::var(key).ok())
    }

    pub fn from_sources(args: CliArgs, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_level = args
            .log_level
            .map(Level::from)
            .or_else(|| lookup(LOG_ENV).and_then(|s| parse_level(&s)))
            .unwrap_or(Level::WARN);
        let prompt = args
            .prompt
            .or_else(|| lookup(PROMPT_ENV))
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
        Self {
            prompt,
            log_level,
            job_control: !args.no_job_control,
            history_file: args.history,
            command: args.command,
        }
    }

    /// Substitute `{user}` and `{dir}` (basename of the working directory).
    pub fn render_prompt(&self, env: &Environment) -> String {
        let dir = match env.current_dir.components().next_back() {
            Some(Component::Normal(name)) => name.to_string_lossy().into_owned(),
            _ => "/".to_string(),
        };
        self.prompt
            .replace("{user}", &env.user())
            .replace("{dir}", &dir)
    }
}

fn parse_level(s: &str) -> Option<Level> {
    s.parse::<LogLevel>().ok().map(Level::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = ShellConfig::from_sources(CliArgs::default(), lookup(&[]));
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert!(config.job_control);
        assert!(config.command.is_none());
    }

    #[test]
    fn flag_beats_environment() {
        let args = CliArgs {
            log_level: Some(LogLevel::Trace),
            ..CliArgs::default()
        };
        let config = ShellConfig::from_sources(args, lookup(&[(LOG_ENV, "info")]));
        assert_eq!(config.log_level, Level::TRACE);
    }

    #[test]
    fn environment_beats_default() {
        let config = ShellConfig::from_sources(
            CliArgs::default(),
            lookup(&[(LOG_ENV, "debug"), (PROMPT_ENV, "> ")]),
        );
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompt, "> ");
    }

    #[test]
    fn garbage_level_falls_back() {
        let config = ShellConfig::from_sources(CliArgs::default(), lookup(&[(LOG_ENV, "loud")]));
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn prompt_placeholders() {
        let mut env = Environment::new();
        env.set_var("USER", "alice");
        env.current_dir = PathBuf::from("/home/alice/src");
        let config = ShellConfig::default();
        assert_eq!(config.render_prompt(&env), "alice:src$ ");

        env.current_dir = PathBuf::from("/");
        assert_eq!(config.render_prompt(&env), "alice:/$ ");
    }
}
