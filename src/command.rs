use std::io::Write;
use std::path::PathBuf;

use crate::interpreter::Session;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Signal terminations are folded into the same space as `128 + signal`,
/// mirroring POSIX shells.
pub type ExitCode = i32;

/// Status reported when a program could not be resolved.
pub const NOT_FOUND_STATUS: ExitCode = 127;

/// Status reported when a program was found but its image could not be loaded.
pub const EXEC_FAILED_STATUS: ExitCode = 126;

/// Offset added to a signal number to form an exit code.
pub const SIGNAL_STATUS_BASE: ExitCode = 128;

/// Where an output stream of a command is redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    /// Append (`>>`) instead of truncating (`>`).
    pub append: bool,
}

impl OutputTarget {
    pub fn truncate(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
        }
    }

    pub fn append(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: true,
        }
    }

    /// Open the target for writing, creating it when missing.
    pub fn open(&self) -> std::io::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
    }
}

/// A fully parsed command line, ready to be dispatched.
///
/// This is what the job control engine consumes; producing it from raw text is
/// the job of [`crate::parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Program name or path, as typed.
    pub program: String,
    pub args: Vec<String>,
    /// Launched with a trailing `&`.
    pub background: bool,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<OutputTarget>,
    pub stderr: Option<OutputTarget>,
    /// The original command line without the trailing `&`, shown by `jobs`.
    pub text: String,
}

impl CommandDescriptor {
    /// Descriptor for `program args...` with no redirections, running in the foreground.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let text = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            background: false,
            stdin: None,
            stdout: None,
            stderr: None,
            text,
        }
    }

    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_stdout(mut self, target: OutputTarget) -> Self {
        self.stdout = Some(target);
        self
    }
}

/// Object-safe trait for any command the shell runs in-process.
///
/// Implemented for every built-in through a blanket impl.
pub trait ExecutableCommand {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        session: &mut Session,
    ) -> anyhow::Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`; the
/// interpreter then hands the line to the job controller as an external program.
pub trait CommandFactory {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
