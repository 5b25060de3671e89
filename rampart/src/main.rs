use clap::{Parser, Subcommand};
use rampart::{Rampart, RampartBuilder, SqliteRepositoryProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line interface for Rampart
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "RAMPART_DATABASE_URL", default_value = "sqlite://rampart.db")]
    database_url: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Clear an account's lockout and revoke its sessions
    Unlock {
        /// Account identifier, e.g. an email address
        identifier: String,
        /// Who is performing the unlock, recorded in the security log
        #[arg(long, env = "USER")]
        actor: String,
    },
    /// Show the lockout state of an account
    Status {
        /// Account identifier, e.g. an email address
        identifier: String,
    },
    /// Delete expired lockout, idempotency and session rows
    Sweep,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            println!("Running migrations...");
            let rampart = connect(&cli.database_url).await?;
            rampart.migrate().await?;
            println!("Migrations applied");
        }
        Commands::Unlock { identifier, actor } => {
            let rampart = connect(&cli.database_url).await?;
            let outcome = rampart.unlock_account(&identifier, &actor).await?;
            println!(
                "Unlocked {} (was locked: {}, sessions revoked: {})",
                outcome.identifier,
                outcome.was_locked,
                outcome.revoked_sessions.len()
            );
        }
        Commands::Status { identifier } => {
            let rampart = connect(&cli.database_url).await?;
            let status = rampart.lockout_status(&identifier).await?;
            match status.locked_until {
                Some(until) if status.is_locked => println!(
                    "{}: locked until {} ({} failed attempts)",
                    status.identifier, until, status.failed_attempts
                ),
                _ => println!(
                    "{}: not locked ({} failed attempts)",
                    status.identifier, status.failed_attempts
                ),
            }
        }
        Commands::Sweep => {
            let rampart = connect(&cli.database_url).await?;
            // The in-memory guards are empty in a fresh process, only the
            // durable tables have anything to remove.
            for report in rampart.sweep_once().await {
                match report.removed {
                    Ok(count) => println!("{}: removed {}", report.task, count),
                    Err(e) => eprintln!("{}: failed: {}", report.task, e),
                }
            }
        }
        Commands::Version => {
            println!("Rampart v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn connect(
    database_url: &str,
) -> Result<Rampart<SqliteRepositoryProvider>, Box<dyn std::error::Error>> {
    let rampart = RampartBuilder::new()
        .with_sqlite(database_url)
        .await?
        .with_config_from_env()?
        .build()
        .await?;
    Ok(rampart)
}
