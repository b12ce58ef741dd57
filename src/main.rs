mod api;
mod commands;
mod config;
mod connectivity;
mod state;
mod status;
mod sync;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::ExpenseForm;
use config::Settings;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "expensepro-sync", version, about = "Offline expense capture and sync")]
struct Cli {
    /// Directory holding the offline queue (overrides EXPENSEPRO_QUEUE_DIR)
    #[arg(long, global = true)]
    queue_dir: Option<PathBuf>,

    /// Backend base URL (overrides EXPENSEPRO_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an expense (queued locally when the backend is unreachable)
    Add {
        #[arg(long)]
        date: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        payee: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        purpose: Option<String>,
        #[arg(long)]
        paid_by: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Extra form field as key=value (repeatable)
        #[arg(long = "field", value_parser = commands::parse_field)]
        fields: Vec<(String, serde_json::Value)>,
    },
    /// List entries waiting to be synced
    Pending,
    /// Sync queued entries now, including held ones
    Sync,
    /// Remove synced entries from the queue
    Prune,
    /// Keep running and sync whenever the backend becomes reachable
    Watch,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut settings = Settings::from_env().map_err(|e| e.to_string())?;
    if let Some(dir) = cli.queue_dir {
        settings.queue_dir = dir;
    }
    if let Some(url) = cli.api_url {
        settings.api_url = url.trim_end_matches('/').to_string();
    }
    log::debug!("Backend: {}", settings.api_url);

    let state = AppState::new(settings);

    match cli.command {
        Command::Add {
            date,
            category,
            payee,
            amount,
            purpose,
            paid_by,
            status,
            fields,
        } => {
            let form = ExpenseForm {
                date,
                category,
                payee,
                amount,
                purpose,
                paid_by,
                status,
                extra: fields,
            };
            commands::add_expense(&state, form).await
        }
        Command::Pending => commands::show_pending(&state),
        Command::Sync => commands::sync_now(&state).await.map(|_| ()),
        Command::Prune => commands::prune(&state).map(|_| ()),
        Command::Watch => commands::watch(&state).await,
    }
}
