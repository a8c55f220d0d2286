//! shellas - execute a program in a specified Android security context.

mod args;

use std::io::Write as _;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "shellas: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let matches = args::command().try_get_matches()?;

    if matches.get_flag("help") {
        eprint!("{}", args::USAGE);
        return Ok(ExitCode::FAILURE);
    }

    let invocation = args::resolve(&matches)?;

    if invocation.verbose {
        eprint!("{}", invocation.context.render_dump());
    }

    shellas::launch(&invocation.context, &invocation.argv)?;
    Ok(ExitCode::SUCCESS)
}
