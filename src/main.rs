use anyhow::{Context, Result};
use bucket_filter::{
    ImportError,
    config::{self, Args},
    db,
    progress::SpinnerProgress,
    run_registration,
};
use clap::CommandFactory;
use std::{io, process::ExitCode};
use tracing_subscriber::EnvFilter;

/// Exit status for failures that are not part of the import taxonomy.
const GENERIC_FAILURE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup (stderr; stdout is the operator channel) ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = match config::parse_args_from(std::env::args_os()) {
        Ok(Some(args)) => args,
        Ok(None) => {
            let _ = Args::command().print_help();
            return ExitCode::SUCCESS;
        }
        Err(err) => err.exit(),
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}", err);
            let code = err
                .downcast_ref::<ImportError>()
                .map(ImportError::exit_code)
                .unwrap_or(GENERIC_FAILURE);
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let db_url = config::resolve_database_url(&args, config::database_url_from_env())?;

    // --- Handle migration mode ---
    if args.migrate {
        let db = db::connect(&db_url).await?;
        db::run_migrations(&db)
            .await
            .context("migrating bucket filter schema")?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let progress = SpinnerProgress::new();

    let summary = run_registration(&args, &db_url, &mut input, &mut stdout, &progress).await?;

    if args.json {
        println!("{}", summary.render_json());
    } else {
        println!("{}", summary.render_text());
    }
    Ok(())
}
