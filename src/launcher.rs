use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::errno::Errno;
use nix::unistd::Pid;
use tracing::debug;

use crate::command::CommandDescriptor;
use crate::env::Environment;
use crate::errors::{JobError, Result};
use crate::signals;
use crate::terminal;

/// A child that was created successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spawned {
    pub pid: Pid,
    /// Always equal to `pid`: every job leads its own process group.
    pub pgid: Pid,
}

/// Creates child processes for external commands.
///
/// Each child is placed in a new process group whose id is its pid, so that
/// terminal-generated signals and `kill %N` reach exactly one job.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    job_control: bool,
}

impl ProcessLauncher {
    /// With `job_control`, foreground children take the terminal themselves and
    /// get default dispositions for the signals the shell ignores.
    pub fn new(job_control: bool) -> Self {
        Self { job_control }
    }

    pub fn launch(&self, desc: &CommandDescriptor, env: &Environment) -> Result<Spawned> {
        let program = resolve_program(env, &desc.program)?;

        let mut cmd = Command::new(&program);
        cmd.args(&desc.args)
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&env.current_dir)
            .process_group(0);

        if let Some(path) = &desc.stdin {
            let file = File::open(path).map_err(|source| JobError::Redirection {
                path: path.clone(),
                source,
            })?;
            cmd.stdin(file);
        }
        if let Some(target) = &desc.stdout {
            cmd.stdout(target.open().map_err(|source| JobError::Redirection {
                path: target.path.clone(),
                source,
            })?);
        }
        if let Some(target) = &desc.stderr {
            cmd.stderr(target.open().map_err(|source| JobError::Redirection {
                path: target.path.clone(),
                source,
            })?);
        }

        if self.job_control {
            let take_terminal = !desc.background;
            // SAFETY: the hook only performs async-signal-safe system calls
            // (tcsetpgrp, getpid, sigaction) between fork and exec.
            unsafe {
                cmd.pre_exec(move || prepare_child(take_terminal));
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| classify_spawn_error(&desc.program, e))?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!(%pid, program = %program.display(), background = desc.background, "launched");
        Ok(Spawned { pid, pgid: pid })
    }
}

fn prepare_child(take_terminal: bool) -> io::Result<()> {
    if take_terminal {
        terminal::claim_for_self();
    }
    signals::reset_for_child()
}

fn resolve_program(env: &Environment, program: &str) -> Result<PathBuf> {
    let search_paths = env.get_var("PATH").unwrap_or_default();
    let path = Path::new(program);
    let found = if path.is_relative() && path.components().count() > 1 {
        // `bin/tool` is relative to the shell's working directory, not the process's.
        find_by_path(&env.current_dir.join(path)).map(Path::to_path_buf)
    } else {
        find_command_path(OsStr::new(&search_paths), path).map(Cow::into_owned)
    };
    found.ok_or_else(|| JobError::ProgramNotFound(program.to_string()))
}

/// Fork failures come back as EAGAIN/ENOMEM; anything else was reported by
/// the child after the fork, when loading the program image.
fn classify_spawn_error(program: &str, err: io::Error) -> JobError {
    match err.raw_os_error() {
        Some(code) if code == Errno::EAGAIN as i32 || code == Errno::ENOMEM as i32 => {
            JobError::ForkFailed(err)
        }
        _ if err.kind() == io::ErrorKind::NotFound => JobError::ProgramNotFound(program.to_string()),
        _ => JobError::ExecFailed {
            program: program.to_string(),
            source: err,
        },
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - `./foo`, or a relative path with several components: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing regular file.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(x), None) if !path.starts_with(".") => {
            find_in_path(search_paths, x.as_os_str()).map(Cow::Owned)
        }
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(osstr("/bin"), path).expect("Expected to find /bin/sh");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let res = find_command_path(osstr("/bin"), Path::new("/bin/nonexisting"));
        assert!(res.is_none(), "Expected not to find /bin/nonexisting");
    }

    #[test]
    fn single_component_found_in_path() {
        let found = find_command_path(osstr("/nonexistent-dir:/bin"), Path::new("sh"))
            .expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("nonexisting"));
        assert!(res.is_none(), "Expected not to find 'nonexisting' in PATH");
    }

    #[test]
    fn directories_in_path_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tool")).unwrap();
        let search = dir.path().as_os_str().to_owned();
        assert!(find_command_path(&search, Path::new("tool")).is_none());
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(osstr("/bin"), Path::new("")).is_none());
    }

    #[test]
    fn relative_paths_resolve_against_shell_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join("tool"), "#!/bin/sh\n").unwrap();

        let mut env = Environment::new();
        env.current_dir = dir.path().to_path_buf();
        let resolved = resolve_program(&env, "bin/tool").unwrap();
        assert_eq!(resolved, dir.path().join("bin").join("tool"));

        assert!(matches!(
            resolve_program(&env, "bin/missing"),
            Err(JobError::ProgramNotFound(name)) if name == "bin/missing"
        ));
    }

    #[test]
    fn spawn_errors_are_classified() {
        let fork = classify_spawn_error("x", io::Error::from_raw_os_error(Errno::EAGAIN as i32));
        assert!(matches!(fork, JobError::ForkFailed(_)));

        let exec = classify_spawn_error("x", io::Error::from_raw_os_error(Errno::EACCES as i32));
        assert!(matches!(exec, JobError::ExecFailed { .. }));

        let missing = classify_spawn_error("x", io::Error::from_raw_os_error(Errno::ENOENT as i32));
        assert!(matches!(missing, JobError::ProgramNotFound(_)));
    }
}
