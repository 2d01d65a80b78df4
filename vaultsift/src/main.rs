//! Offline decrypt-and-filter tool for password vault exports.
//!
//! Reads a sealed export, decrypts its records on a bounded worker pool and
//! prints the records matching a filter expression as JSON on stdout.
//! Diagnostics go to stderr.
//!
//! # Security Guarantees
//! - Offline operation: only the local export file is read
//! - The export password is never logged or echoed
//! - Secrets are only decrypted when a selected column or the filter needs them

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vaultsift::export::ExportFile;
use vaultsift::output::render_json;
use vaultsift::{Cli, Command, describe_filter, export_password, narrow, sift};
use vaultsift_core::{Result, SiftError, logging::init_logging};

/// Exit status when a valid filter matched no records
const EXIT_NO_MATCH: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    if let Some(Command::CheckFilter(args)) = &cli.command {
        let report = describe_filter(&args.expression).context("Invalid filter expression")?;
        println!("{}", report);
        return Ok(ExitCode::SUCCESS);
    }

    match list_records(&cli).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_no_match() => {
            eprintln!("{}", e);
            Ok(ExitCode::from(EXIT_NO_MATCH))
        }
        // anyhow prints the error chain on exit
        Err(e) => Err(e.into()),
    }
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Decrypts the export and prints the matching records
async fn list_records(cli: &Cli) -> Result<()> {
    let plan = cli.query_plan()?;
    let path = cli.export.as_deref().ok_or_else(|| {
        SiftError::configuration(
            "An export file is required. Use --export or set VAULTSIFT_EXPORT",
        )
    })?;

    info!("Reading export {}", path.display());
    let export = ExportFile::load(path).await?;

    let (password, source) = export_password()?;
    debug!("Export password taken from {:?}", source);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let items = sift(&export, &password, &plan, cli.pipeline_config(), &cancel).await?;
    let items = narrow(items, &cli.search);

    info!("{} record(s) matched", items.len());
    println!("{}", render_json(&items, &plan.columns)?);
    Ok(())
}
