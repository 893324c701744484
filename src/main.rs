use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{ConfigCommand, ProfileCommand, TodoCommand};
use config::Config;
use docbind::{Database, MemoryStore, PersistenceOutcome};

#[derive(Parser)]
#[command(name = "docbind")]
#[command(version)]
#[command(about = "Todo list and profile records over a document store", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage todos
    Todo(TodoCommand),

    /// Manage user profiles
    Profile(ProfileCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "docbind=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn open_database(config: &Config) -> Result<Database<MemoryStore>, Box<dyn std::error::Error>> {
    let db = Database::new();
    let report = db
        .initialize(&config.credentials.value, &config.init_options())
        .await?;
    if let PersistenceOutcome::Failed(e) = &report.persistence {
        // Without the cache nothing written here would survive the process.
        return Err(format!("offline cache unavailable: {}", e).into());
    }
    Ok(db)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Todo(cmd)) => {
            let db = open_database(&config).await?;
            let result = cmd.run(&db).await;
            db.cancel_all();
            result?;
        }
        Some(Commands::Profile(cmd)) => {
            let db = open_database(&config).await?;
            let result = cmd.run(&db).await;
            db.cancel_all();
            result?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
