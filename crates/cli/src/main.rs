//! WallCraft CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! wc-cli migrate
//!
//! # Create a customer or admin account
//! wc-cli user create -e buyer@example.com -p 'Sup3rSecret' --name "Ana"
//! wc-cli user create -e ops@wallcraft.store -p 'Sup3rSecret' --admin
//!
//! # Seed the catalog (bundled sample, or a YAML file)
//! wc-cli seed
//! wc-cli seed --file catalog.yaml
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "wc-cli")]
#[command(author, version, about = "WallCraft CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Manage user accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Seed categories and wallpapers
    Seed {
        /// YAML catalog file (defaults to the bundled sample catalog)
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Password (min 8 chars, upper, lower and a digit)
        #[arg(short, long)]
        password: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::User { action } => match action {
            UserAction::Create {
                email,
                password,
                name,
                admin,
            } => {
                commands::user::create_user(&email, &password, name.as_deref(), admin).await?;
            }
        },
        Commands::Seed { file } => commands::seed::catalog(file.as_deref()).await?,
    }
    Ok(())
}
