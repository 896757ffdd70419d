//! Binary crate for the `weather-etl` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Logging setup
//! - Interactive configuration

use clap::Parser;

mod cli;

/// Log filter used when `RUST_LOG` is unset. `-v` only raises our own crates.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,weather_etl_core=debug,weather_etl=debug"
    } else {
        "info"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(cmd.verbose)),
    )
    .init();

    cmd.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_leaves_dependencies_at_info() {
        assert_eq!(default_filter(false), "info");

        let verbose = default_filter(true);
        assert!(verbose.starts_with("info,"));
        assert!(verbose.contains("weather_etl_core=debug"));
        assert!(verbose.contains("weather_etl=debug"));
    }
}
