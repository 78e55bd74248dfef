//! Probzel - contest problem preparation and judging
//!
//! Orchestrates:
//! 1. Problem lookup and configuration (problem.yml)
//! 2. Test building through the job cache (convenient-cache)
//! 3. Sandboxed compilation and runs (convenient-judge)
//! 4. Invocations of solutions and their archive

use clap::Parser;
use probzel::commands::{self, Cli, Commands, Workspace};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "probzel=info,convenient_judge=info,convenient_cache=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::resolve(cli.problem.as_deref(), cli.sandbox)?;
    tracing::debug!("Problem home: {}", workspace.home.display());

    let outcome = match cli.command {
        Commands::Tests => commands::update::execute(&workspace).await,
        Commands::Invoke {
            solutions,
            all,
            refresh,
        } => {
            commands::invoke::execute(&workspace, solutions, all, Duration::from_millis(refresh))
                .await
        }
        Commands::Invocations => commands::invocations::list(&workspace).await,
        Commands::Show { uid } => commands::invocations::show(&workspace, uid).await,
        Commands::Clean { mrproper } => commands::clean::execute(&workspace, mrproper).await,
    };

    if let Err(e) = outcome {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    Ok(())
}
