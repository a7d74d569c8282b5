use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::controller::{ForegroundOutcome, KillTarget};
use crate::env::Environment;
use crate::errors::JobError;
use crate::interpreter::{Factory, Session};
use crate::job::JobId;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use nix::sys::signal::Signal;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. They never become jobs.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "jobs" or "cd".
    fn name() -> &'static str;

    /// Executes the command using the provided output stream and session.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        match T::execute(*self, stdout, session) {
            Ok(x) => Ok(x),
            Err(e) => {
                let job_error = e.downcast_ref::<JobError>();
                eprintln!("{}: {:#}", T::name(), e);
                Ok(match job_error {
                    Some(err) if err.is_warning() => 0,
                    Some(err) => err.exit_code(),
                    None => 1,
                })
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitCode> {
        if self.is_error {
            eprintln!("{}", self.output.trim_end());
            Ok(2)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// List jobs with their state and command line.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        for line in session.jobs.jobs() {
            writeln!(stdout, "{line}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it.
pub struct Fg {
    #[argh(positional)]
    /// job number, as `N` or `%N`; defaults to the current job.
    pub job: Option<JobId>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let id = session.jobs.resolve(self.job)?;
        if let Some(job) = session.jobs.table().lookup(id) {
            writeln!(stdout, "{}", job.command_text)?;
            stdout.flush()?;
        }
        let outcome = session.jobs.foreground(Some(id))?;
        if let ForegroundOutcome::Stopped(id) = outcome {
            if let Some(job) = session.jobs.table().lookup(id) {
                writeln!(stdout, "\n{}", job.status_line())?;
            }
        }
        Ok(outcome.exit_code())
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// job number, as `N` or `%N`; defaults to the current job.
    pub job: Option<JobId>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let id = session.jobs.background(self.job)?;
        if let Some(job) = session.jobs.table().lookup(id) {
            writeln!(stdout, "[{}] {}", id, job.display_command())?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Send a signal to processes or jobs.
pub struct Kill {
    #[argh(option, short = 's', default = "String::from(\"TERM\")")]
    /// signal name (`TERM`, `SIGTERM`) or number; defaults to TERM.
    pub signal: String,

    #[argh(positional, greedy)]
    /// process ids, or `%N` for every process of job N.
    pub targets: Vec<String>,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let sig = parse_signal(&self.signal)?;
        if self.targets.is_empty() {
            bail!("usage: kill [-s SIGNAL] TARGET...");
        }

        let mut failed = false;
        for raw in &self.targets {
            let result = KillTarget::from_str(raw)
                .map_err(|_| anyhow!("{raw}: arguments must be process or job IDs"))
                .and_then(|target| Ok(session.jobs.kill(target, sig)?));
            if let Err(e) = result {
                eprintln!("kill: {e}");
                failed = true;
            }
        }
        Ok(if failed { 1 } else { 0 })
    }
}

/// Accepts `TERM`, `SIGTERM`, `term` or a signal number.
pub(crate) fn parse_signal(spec: &str) -> Result<Signal> {
    if let Ok(number) = spec.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| anyhow!("{spec}: invalid signal specification"));
    }
    let upper = spec.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| anyhow!("{spec}: invalid signal specification"))
}

#[derive(FromArgs)]
/// Exit the shell, terminating any remaining jobs.
pub struct Exit {
    #[argh(positional)]
    /// exit status; defaults to the status of the last command.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let code = self.code.unwrap_or(session.env.last_status);
        session.env.exit_request = Some(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        writeln!(stdout, "{}", session.env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let env = &mut session.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("no target and HOME not set"),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        env.set_var("PWD", canonical.to_string_lossy());
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

/// Apply `op` to every operand, resolved against the shell's working directory.
///
/// A failing operand is reported as `name: operand: error` and does not stop
/// the rest; the status is 1 if any of them failed.
fn each_operand(
    name: &str,
    operands: &[String],
    env: &Environment,
    mut op: impl FnMut(&Path) -> Result<()>,
) -> Result<ExitCode> {
    if operands.is_empty() {
        bail!("missing operand");
    }
    let mut failed = false;
    for operand in operands {
        if let Err(e) = op(&env.current_dir.join(operand)) {
            eprintln!("{name}: {operand}: {e:#}");
            failed = true;
        }
    }
    Ok(if failed { 1 } else { 0 })
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(self, stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitCode> {
        write!(stdout, "\x1b[H\x1b[J")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List directory entries, one per line, sorted by name.
pub struct Ls {
    #[argh(positional)]
    /// directory to list; defaults to the current directory.
    pub dir: Option<String>,
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let dir = match &self.dir {
            Some(d) => session.env.current_dir.join(d),
            None => session.env.current_dir.clone(),
        };
        let mut names = fs::read_dir(&dir)
            .with_context(|| format!("cannot access {}", dir.display()))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        for name in names {
            writeln!(stdout, "{name}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// print file(s) to stdout
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print, in order.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        each_operand(Self::name(), &self.files, &session.env, |path| {
            let mut f = fs::File::open(path)?;
            io::copy(&mut f, &mut *stdout)?;
            Ok(())
        })
    }
}

#[derive(FromArgs)]
/// Create directories, including missing parents.
pub struct Mkdir {
    #[argh(positional, greedy)]
    /// directories to create; each must not exist yet.
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        each_operand(Self::name(), &self.dirs, &session.env, |path| {
            if path.exists() {
                bail!("File exists");
            }
            fs::create_dir_all(path)?;
            Ok(())
        })
    }
}

#[derive(FromArgs)]
/// Remove empty directories.
pub struct Rmdir {
    #[argh(positional, greedy)]
    /// directories to remove.
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Rmdir {
    fn name() -> &'static str {
        "rmdir"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        each_operand(Self::name(), &self.dirs, &session.env, |path| {
            fs::remove_dir(path)?;
            Ok(())
        })
    }
}

#[derive(FromArgs)]
/// Remove files. Directories are refused.
pub struct Rm {
    #[argh(positional, greedy)]
    /// files to remove.
    pub files: Vec<String>,
}

impl BuiltinCommand for Rm {
    fn name() -> &'static str {
        "rm"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        each_operand(Self::name(), &self.files, &session.env, |path| {
            if path.is_dir() {
                bail!("is a directory");
            }
            fs::remove_file(path)?;
            Ok(())
        })
    }
}

#[derive(FromArgs)]
/// Create files or update their modification time.
pub struct Touch {
    #[argh(positional, greedy)]
    /// files to touch.
    pub files: Vec<String>,
}

impl BuiltinCommand for Touch {
    fn name() -> &'static str {
        "touch"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        each_operand(Self::name(), &self.files, &session.env, |path| {
            let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            file.set_modified(SystemTime::now())?;
            Ok(())
        })
    }
}
