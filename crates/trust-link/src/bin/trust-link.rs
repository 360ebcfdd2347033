//! CLI entrypoint for trust-link.

#[path = "trust-link/cli.rs"]
mod cli;
#[path = "trust-link/run.rs"]
mod run;
#[path = "trust-link/style.rs"]
mod style;

use clap::Parser;
use tracing::Level;

use cli::{Cli, Command};
use style::Tone;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("{}", style::paint(Tone::Error, format!("Error: {err:#}")));
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Status {
            config,
            timeout_ms,
            settle_ms,
        } => {
            let config = run::load_config(&config, timeout_ms, None)?;
            init_logging(cli.verbose, &config.log_level);
            run::run_status(&config, settle_ms)
        }
        Command::Watch {
            config,
            controller,
            program,
            vars,
            namespace,
            seconds,
            timeout_ms,
            history,
        } => {
            let config = run::load_config(&config, timeout_ms, history)?;
            init_logging(cli.verbose, &config.log_level);
            run::run_watch(
                &config,
                run::WatchArgs {
                    controller,
                    program,
                    vars,
                    namespace,
                    seconds,
                },
            )
        }
        Command::Check { file } => {
            init_logging(cli.verbose, "info");
            run::run_check(&file)
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    let level = if verbose {
        Level::DEBUG
    } else {
        level.parse().unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
