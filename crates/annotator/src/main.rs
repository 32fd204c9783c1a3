use clap::Parser;
use tracing_subscriber::EnvFilter;

use qc_annotator::cli::{self, Cli, Command};
use qc_domain::error::Error;

/// Exit codes: 0 success, 1 halted on persistent agent failure,
/// 2 storage error, 64 usage error.
fn exit_code(e: &Error) -> i32 {
    match e {
        Error::Storage(_) | Error::Io(_) => 2,
        Error::Config(_) => 64,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap's own help/version output still prints normally.
            let is_help = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            std::process::exit(if is_help { 0 } else { 64 });
        }
    };

    init_tracing();

    let result = match cli.command {
        Command::Run {
            corpus,
            annotator_db,
            agent_url,
            limit,
            no_resume,
            batch_size,
            config,
        } => {
            cli::run::run(
                &corpus,
                &annotator_db,
                agent_url,
                limit,
                no_resume,
                batch_size,
                config,
            )
            .await
        }
        Command::Status { annotator_db } => cli::status::status(&annotator_db),
        Command::Inspect {
            annotator_db,
            target,
        } => cli::inspect::inspect(&annotator_db, &target),
        Command::Export {
            annotator_db,
            format,
            status,
            tags,
        } => cli::export::export(&annotator_db, format, status.as_deref(), &tags),
        Command::Version => {
            println!("questcodex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("questcodex: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,qc_annotator=debug")),
        )
        .with_writer(std::io::stderr)
        .init();
}
