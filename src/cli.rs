//! Command-line arguments of the `jobsh` binary, parsed with [`argh`].

use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;

#[derive(Debug, Clone, Default, FromArgs)]
/// An interactive shell with Unix job control.
pub struct CliArgs {
    #[argh(option)]
    /// logging level (error, warn, info, debug, trace); overrides JOBSH_LOG.
    pub log_level: Option<LogLevel>,

    #[argh(option)]
    /// prompt template; `{user}` and `{dir}` are substituted.
    pub prompt: Option<String>,

    #[argh(switch)]
    /// never take the terminal or move children between foreground and background groups.
    pub no_job_control: bool,

    #[argh(option)]
    /// file to load line-editor history from and save it to.
    pub history: Option<PathBuf>,

    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status.
    pub command: Option<String>,
}

/// Log level as exposed on the command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Convenience wrapper around `argh::from_env()`.
pub fn parse() -> CliArgs {
    argh::from_env()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Result<CliArgs, argh::EarlyExit> {
        CliArgs::from_args(&["jobsh"], args)
    }

    #[test]
    fn no_arguments_gives_defaults() {
        let args = parse_args(&[]).unwrap();
        assert_eq!(args.log_level, None);
        assert!(!args.no_job_control);
        assert!(args.command.is_none());
    }

    #[test]
    fn flags_are_parsed() {
        let args = parse_args(&[
            "--log-level",
            "debug",
            "--no-job-control",
            "--history",
            "/tmp/h",
            "-c",
            "sleep 1 &",
        ])
        .unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.no_job_control);
        assert_eq!(args.history, Some(PathBuf::from("/tmp/h")));
        assert_eq!(args.command.as_deref(), Some("sleep 1 &"));
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(parse_args(&["--log-level", "loud"]).is_err());
    }
}
