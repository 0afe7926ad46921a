use clap::Parser;
use coursectl::cli::{Cli, Command};
use coursectl::{commands, db, Config, Error};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "coursectl=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Usage errors exit here, before anything is touched.
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Error::PrecheckFailed(results) = &e {
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(results).unwrap_or_else(|_| format!("{:?}", results))
                );
            }
            debug!(kind = ?e.kind(), "command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> coursectl::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let conn = db::open_db(&config.database_path)?;
    let admin = commands::require_admin(&conn, &config)?;
    debug!(admin = %admin.username, "resolved admin account");

    match cli.command {
        Command::Import(args) => {
            let req = args.into_request()?;
            commands::import::run(&conn, &config, &admin, &req)?;
        }
        Command::Restore(args) => {
            let req = args.into_request()?;
            commands::restore::run(&conn, &config, &admin, &req)?;
        }
        Command::Backup(args) => {
            commands::backup::run(&conn, &config, &admin, &args.into_request())?;
        }
    }
    Ok(())
}
