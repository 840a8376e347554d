use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use weir::config::{Cli, Config};
use weir::input::DummySession;

fn main() {
    // Setup logging.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::new(Cli::parse());

    if let Err(err) = weir::run(config, Box::<DummySession>::default()) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
