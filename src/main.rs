use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lintcompare::cli::Args;
use lintcompare::error::CompareError;
use lintcompare::pipeline::install_interrupt_handler;

fn main() {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    install_interrupt_handler();

    match lintcompare::run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<CompareError>()
                .map_or(3, CompareError::exit_code);
            process::exit(code);
        }
    }
}
