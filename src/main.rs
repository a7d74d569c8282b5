use std::process;

use anyhow::Result;
use jobsh::config::ShellConfig;
use jobsh::{ExitCode, Interpreter, cli, logging};

fn run_main() -> Result<ExitCode> {
    let args = cli::parse();
    let config = ShellConfig::from_args(args);
    logging::init_logging(config.log_level)?;

    let mut shell = Interpreter::new(config)?;
    shell.run()
}

fn main() {
    match run_main() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("jobsh: {e:#}");
            process::exit(1);
        }
    }
}
