use crate::command::{CommandDescriptor, CommandFactory, ExecutableCommand, ExitCode};
use crate::config::ShellConfig;
use crate::controller::{ForegroundOutcome, JobController};
use crate::env::Environment;
use crate::errors::JobError;
use crate::parser;
use crate::signals::SignalBridge;
use crate::terminal::TerminalArbiter;
use anyhow::{Context, anyhow, bail};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, IsTerminal, Write};
use tracing::{debug, info, warn};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the built-ins defined in this crate; anything else is an
/// external program and goes to the job controller.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Everything a command may read or change: the shell's environment and its jobs.
pub struct Session {
    pub env: Environment,
    pub jobs: JobController,
}

/// The command loop: reads lines, runs built-ins in-process and hands external
/// programs to the [`JobController`].
pub struct Interpreter {
    session: Session,
    commands: Vec<Box<dyn CommandFactory>>,
    config: ShellConfig,
}

impl Interpreter {
    /// Install child-signal handling and, when stdin is a terminal and job
    /// control was not disabled, take over the terminal.
    ///
    /// Must be called at most once per process.
    pub fn new(config: ShellConfig) -> anyhow::Result<Self> {
        let interactive = config.job_control && io::stdin().is_terminal();
        if interactive {
            TerminalArbiter::wait_for_foreground()
                .context("failed to wait for the terminal")?;
        }
        let bridge =
            SignalBridge::install(interactive).context("failed to install SIGCHLD handling")?;
        let terminal = if interactive {
            TerminalArbiter::attach().context("failed to take control of the terminal")?
        } else {
            TerminalArbiter::detached()
        };
        debug!(interactive, "interpreter ready");
        Ok(Self::from_parts(config, JobController::new(bridge, terminal)))
    }

    /// Build an interpreter around an existing controller.
    pub fn from_parts(config: ShellConfig, jobs: JobController) -> Self {
        use crate::builtin::*;
        Self {
            session: Session {
                env: Environment::new(),
                jobs,
            },
            commands: vec![
                Box::new(Factory::<Jobs>::default()),
                Box::new(Factory::<Fg>::default()),
                Box::new(Factory::<Bg>::default()),
                Box::new(Factory::<Kill>::default()),
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Clear>::default()),
                Box::new(Factory::<Ls>::default()),
                Box::new(Factory::<Cat>::default()),
                Box::new(Factory::<Mkdir>::default()),
                Box::new(Factory::<Rmdir>::default()),
                Box::new(Factory::<Rm>::default()),
                Box::new(Factory::<Touch>::default()),
            ],
            config,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parse and run one command line; returns its status, which also becomes
    /// the last status. Blank lines leave the last status unchanged.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let code = match parser::parse_line(line) {
            Ok(None) => return self.session.env.last_status,
            Ok(Some(desc)) => self.execute(&desc),
            Err(e) => {
                eprintln!("jobsh: {e}");
                2
            }
        };
        self.session.env.last_status = code;
        code
    }

    fn execute(&mut self, desc: &CommandDescriptor) -> ExitCode {
        let args: Vec<&str> = desc.args.iter().map(String::as_str).collect();
        let builtin = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(&desc.program, &args));
        match builtin {
            Some(cmd) => self.run_builtin(cmd, desc),
            None => self.run_external(desc),
        }
    }

    fn run_builtin(&mut self, cmd: Box<dyn ExecutableCommand>, desc: &CommandDescriptor) -> ExitCode {
        if desc.background {
            debug!(program = %desc.program, "ignoring `&` for a built-in");
        }
        let result = match &desc.stdout {
            Some(target) => match target.open() {
                Ok(mut file) => cmd.execute(&mut file, &mut self.session),
                Err(e) => {
                    eprintln!("jobsh: {}: {e}", target.path.display());
                    return 1;
                }
            },
            None => {
                let mut stdout = io::stdout();
                let result = cmd.execute(&mut stdout, &mut self.session);
                let _ = stdout.flush();
                result
            }
        };
        match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("jobsh: {}: {e:#}", desc.program);
                1
            }
        }
    }

    fn run_external(&mut self, desc: &CommandDescriptor) -> ExitCode {
        let Session { env, jobs } = &mut self.session;
        if desc.background {
            return match jobs.launch_background(desc, env) {
                Ok((id, pid)) => {
                    println!("[{id}] {pid}");
                    0
                }
                Err(e) => report(e),
            };
        }
        match jobs.launch_foreground(desc, env) {
            Ok(outcome) => {
                if let ForegroundOutcome::Stopped(id) = outcome {
                    if let Some(job) = jobs.table().lookup(id) {
                        println!("\n{}", job.status_line());
                    }
                }
                outcome.exit_code()
            }
            Err(e) => report(e),
        }
    }

    /// Print pending job notices. Called before every prompt.
    pub fn notify(&mut self) {
        for line in self.session.jobs.reap_and_notify() {
            println!("{line}");
        }
    }

    pub fn prompt(&self) -> String {
        self.config.render_prompt(&self.session.env)
    }

    /// Read-eval-print loop; returns when `exit` runs or input ends.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut rl =
            DefaultEditor::new().map_err(|e| anyhow!("failed to start the line editor: {e}"))?;
        if let Some(path) = &self.config.history_file {
            if let Err(e) = rl.load_history(path) {
                debug!("no history loaded from {}: {e}", path.display());
            }
        }

        while !self.session.env.should_exit() {
            self.notify();
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        if let Err(e) = rl.add_history_entry(line.as_str()) {
                            debug!("history entry dropped: {e}");
                        }
                    }
                    self.execute_line(&line);
                }
                // Ctrl-C only abandons the line being edited.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => bail!("failed to read a command line: {err}"),
            }
        }

        if let Some(path) = &self.config.history_file {
            if let Err(e) = rl.save_history(path) {
                warn!("failed to save history to {}: {e}", path.display());
            }
        }
        Ok(())
    }

    /// Run `-c COMMAND` if configured, otherwise the interactive loop, then
    /// shut down. Returns the status the process should exit with.
    pub fn run(&mut self) -> anyhow::Result<ExitCode> {
        match self.config.command.clone() {
            Some(line) => {
                self.execute_line(&line);
                self.notify();
            }
            None => self.repl()?,
        }
        Ok(self.finish())
    }

    /// Terminate remaining jobs and pick the exit status.
    pub fn finish(&mut self) -> ExitCode {
        let terminated = self.session.jobs.shutdown();
        if terminated > 0 {
            info!(terminated, "terminated remaining jobs on exit");
        }
        self.session
            .env
            .exit_request
            .unwrap_or(self.session.env.last_status)
    }
}

fn report(err: JobError) -> ExitCode {
    eprintln!("jobsh: {err}");
    err.exit_code()
}

#[cfg(test)]
impl Session {
    /// A session over a detached terminal, sharing one process-wide bridge.
    pub(crate) fn for_tests() -> Self {
        use std::sync::OnceLock;
        static BRIDGE: OnceLock<SignalBridge> = OnceLock::new();
        let bridge = BRIDGE
            .get_or_init(|| SignalBridge::install(false).expect("install signal bridge"))
            .clone();
        Self {
            env: Environment::new(),
            jobs: JobController::new(bridge, TerminalArbiter::detached()),
        }
    }
}
