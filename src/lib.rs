//! An interactive command interpreter with Unix job control.
//!
//! The crate is built around a small process/job control engine: child processes
//! are launched into their own process groups, tracked in a [`JobTable`], and
//! moved between foreground and background with `fg`, `bg`, `jobs` and `kill`.
//! Asynchronous child state changes are recorded by the [`SignalBridge`] and only
//! applied by the [`JobController`] at well-defined points of the command loop.
//!
//! The main entry point for the binary is [`Interpreter`], which reads command
//! lines, dispatches built-ins in-process and hands external programs to the
//! controller.

mod builtin;
pub mod cli;
pub mod command;
pub mod config;
pub mod controller;
pub mod env;
pub mod errors;
pub mod job;
pub mod job_table;
pub mod launcher;
mod lexer;
pub mod logging;
pub mod parser;
pub mod signals;
pub mod terminal;
mod interpreter;

pub use command::{CommandDescriptor, CommandFactory, ExecutableCommand, ExitCode, OutputTarget};
pub use controller::{ForegroundOutcome, JobController, KillTarget};
pub use errors::{JobError, Result};
pub use config::ShellConfig;
pub use interpreter::{Interpreter, Session};
pub use job::{Job, JobId, JobState};
pub use job_table::JobTable;
pub use launcher::ProcessLauncher;
pub use signals::SignalBridge;
pub use terminal::TerminalArbiter;
