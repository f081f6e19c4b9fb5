use clap::{Args, Parser, Subcommand};
use logsift::cli::run::RunOverrides;
use logsift::config::resolve_config_path;
use logsift::format::LogFormat;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logsift")]
#[command(about = "Log triage: rule pre-filter and AI classification", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Log format, overriding the configured one
    #[arg(long)]
    format: Option<LogFormat>,

    /// Tail this file instead of the configured sources
    #[arg(long, conflicts_with_all = ["journal", "stdin"])]
    file: Option<PathBuf>,

    /// Follow the systemd journal
    #[arg(long, conflicts_with = "stdin")]
    journal: bool,

    /// Read from standard input
    #[arg(long)]
    stdin: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[derive(Subcommand)]
enum RulesAction {
    /// Show which rule would decide a line
    Check { line: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let overrides = RunOverrides {
                format: args.format,
                file: args.file,
                journal: args.journal,
                stdin: args.stdin,
            };
            logsift::cli::run::run(config_path, overrides).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => logsift::cli::config::init(stdout)?,
            ConfigAction::Validate => logsift::cli::config::validate(config_path)?,
        },
        Commands::Rules { action } => match action {
            RulesAction::Check { line } => logsift::cli::rules::check(config_path, &line)?,
        },
    }

    Ok(())
}
