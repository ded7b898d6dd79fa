//! iambroker — grants cloud IAM access to the applications of a model.
//!
//! # Usage
//!
//! ```text
//! iambroker config init --model-uuid <uuid> --output /etc/iambroker/broker.toml
//! iambroker --config /etc/iambroker/broker.toml watch
//! iambroker reconcile            # one pass, non-zero exit when blocked
//! iambroker cleanup              # revoke keys of departed relations
//! iambroker state show           # dump what the broker has provisioned
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod logging;
mod source;
mod status;

#[derive(Parser)]
#[command(
    name = "iambroker",
    about = "Credential and permission broker for cloud IAM",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to broker.toml.
    #[arg(short, long, global = true, default_value = "/etc/iambroker/broker.toml")]
    config: PathBuf,

    /// Override [broker].state_dir.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Override [requests].path.
    #[arg(long, global = true)]
    requests: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconciliation pass.
    Reconcile,
    /// Reconcile continuously until interrupted.
    ///
    /// Polls the request file every [requests].poll_interval_secs and
    /// re-activates credentials when the [credentials] section changes.
    Watch,
    /// Revoke keys held for relations that no longer exist.
    Cleanup,
    /// Inspect the local state store.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Manage broker.toml.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print project, account cache, key registry and managed entities as JSON.
    Show,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a broker.toml scaffold with default settings.
    Init {
        #[arg(long)]
        model_uuid: String,
        /// Destination file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let overrides = commands::Overrides {
        state_dir: cli.state_dir,
        requests: cli.requests,
    };

    match cli.command {
        Commands::Reconcile => commands::reconcile::reconcile(&cli.config, &overrides),
        Commands::Cleanup => commands::reconcile::cleanup(&cli.config, &overrides),
        Commands::Watch => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::watch::watch(cli.config, overrides))
        }
        Commands::State { action } => match action {
            StateAction::Show => commands::state::show(&cli.config, &overrides),
        },
        Commands::Config { action } => match action {
            ConfigAction::Init {
                model_uuid,
                output,
                force,
            } => commands::config::init(&model_uuid, output.as_deref(), force),
        },
    }
}
