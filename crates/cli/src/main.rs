// Surge CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Logs go to stderr so the text summary on stdout stays pipeable.
// Design Decision: Exit 99 when thresholds fail, 1 on any error.

mod artifacts;
mod commands;
mod output;
mod progress;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use surge_harness::report::ReportFormat;

/// Exit code when every threshold passed
pub const EXIT_OK: u8 = 0;
/// Exit code for configuration, run or artifact errors
pub const EXIT_ERROR: u8 = 1;
/// Exit code when at least one threshold failed
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;

#[derive(Parser)]
#[command(name = "surge")]
#[command(about = "Surge - ramping virtual-user HTTP load tests")]
#[command(version)]
pub struct Cli {
    /// Suppress the progress bar and informational logs
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load test and write its reports
    Run(commands::run::RunArgs),

    /// Check a configuration and print the schedule without sending traffic
    Validate {
        /// Configuration file (YAML); defaults apply when omitted
        #[arg(long, short, env = "SURGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Re-render a saved JSON summary
    Render {
        /// Summary file written by `surge run`
        summary: PathBuf,

        /// Output format
        #[arg(long, short, value_enum, default_value_t = FormatChoice::Text)]
        format: FormatChoice,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatChoice {
    /// Fixed-layout text summary
    Text,
    /// Pretty JSON summary
    Json,
    /// Standalone HTML page
    Html,
}

impl From<FormatChoice> for ReportFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Text => ReportFormat::Text,
            FormatChoice::Json => ReportFormat::Json,
            FormatChoice::Html => ReportFormat::Html,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_logging(telemetry::LogConfig::from_env(cli.quiet));

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.quiet).await,
        Commands::Validate { config } => commands::validate::run(config.as_deref()),
        Commands::Render {
            summary,
            format,
            output,
        } => commands::render::run(&summary, format.into(), output.as_deref()),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
