mod commands;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::prelude::*;

use commands::run::RunArgs;
use commands::validate::ValidateArgs;

/// Run a job across a matrix of platforms and report per-platform results
#[derive(Parser, Debug)]
#[command(name = "matrix-run", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow job on every platform of its matrix
    Run(RunArgs),

    /// Check a workflow and show the expanded matrix and step conditions
    Validate(ValidateArgs),
}

/// Filter used when `RUST_LOG` is unset
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "matrix_service=debug,matrix_cli=debug",
        _ => "matrix_service=trace,matrix_cli=trace",
    }
}

fn init_tracing(verbose: u8) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => {
            let code = commands::run::execute(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Validate(args) => commands::validate::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(default_filter(0), "warn");
        assert!(default_filter(1).contains("matrix_cli=debug"));
        assert!(default_filter(3).contains("matrix_cli=trace"));

        for verbose in 0..3 {
            assert!(tracing_subscriber::EnvFilter::try_new(default_filter(verbose)).is_ok());
        }
    }

    #[test]
    fn test_verbose_flag_is_global() {
        let cli = Cli::parse_from(["matrix-run", "validate", "ci.yml", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Validate(_)));
    }
}
