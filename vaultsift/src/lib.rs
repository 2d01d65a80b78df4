//! Library module for the vaultsift CLI
//!
//! Exposes the export format, sealing and rendering so they can be tested
//! directly. The binary entry point is in main.rs.

pub mod export;
pub mod output;
pub mod sealed;

use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use vaultsift_core::{
    DecryptedItem, FilterExpression, PipelineConfig, QueryPlan, Result, Session, SiftError,
    TypeResolver, UnsupportedTypePolicy, quick_search,
};

use crate::export::ExportFile;

/// Environment variable holding the export password.
pub const PASSWORD_ENV: &str = "VAULTSIFT_PASSWORD";

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "vaultsift")]
#[command(about = "Decrypt and filter an encrypted password vault export")]
#[command(version)]
#[command(long_about = "
vaultsift - offline decrypt-and-filter for password vault exports

Decrypts the records of an export on a bounded worker pool, keeps them in
export order, skips records of unsupported types with a warning, and prints
the records matching a filter expression as JSON.

Secrets are only decrypted when a Password or Description column is
selected or the filter references one of those fields.

FILTER VARIABLES:
  ID, FolderParentID, Name, Username, URI, Password, Description,
  CreatedTimestamp, ModifiedTimestamp

EXAMPLES:
  vaultsift --export vault.json
  vaultsift --export vault.json -f 'Username == \"alice\"'
  vaultsift --export vault.json -c name -c password -f 'size(Password) < 12'
  vaultsift --export vault.json --search gitlab
  vaultsift check-filter 'URI.startsWith(\"https://\") && Name.contains(\"prod\")'
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Export file to read
    #[arg(long, env = "VAULTSIFT_EXPORT", value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Filter expression
    #[arg(
        short,
        long,
        default_value = "",
        help = "Filter expression, e.g. 'Name.contains(\"git\")'"
    )]
    pub filter: String,

    /// Output columns
    #[arg(
        short,
        long = "column",
        value_delimiter = ',',
        help = "Column to output (repeatable; defaults to ID,FolderParentID,Name,Username,URI)"
    )]
    pub columns: Vec<String>,

    /// Quick search text
    #[arg(
        short,
        long,
        default_value = "",
        value_name = "TEXT",
        help = "Only show records whose name, username or URI contains TEXT (case-insensitive)"
    )]
    pub search: String,

    /// Worker count
    #[arg(
        long,
        env = "VAULTSIFT_WORKERS",
        help = "Number of concurrent decryption workers (defaults to available parallelism)"
    )]
    pub workers: Option<usize>,

    /// Treat unsupported record types as fatal
    #[arg(long, help = "Fail instead of skipping records of unsupported types")]
    pub fail_on_unsupported: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile a filter expression without reading an export
    CheckFilter(CheckFilterArgs),
}

/// Arguments of `check-filter`
#[derive(Debug, Args)]
pub struct CheckFilterArgs {
    /// Expression to compile
    pub expression: String,
}

/// Flags accepted by every command
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress informational output
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress informational diagnostics (warnings such as the unsupported-type summary are still shown)"
    )]
    pub quiet: bool,
}

impl Cli {
    /// Builds the query plan from the column and filter flags.
    ///
    /// # Errors
    /// Returns column or filter compile errors.
    pub fn query_plan(&self) -> Result<QueryPlan> {
        if self.columns.is_empty() {
            QueryPlan::with_default_columns(&self.filter)
        } else {
            QueryPlan::new(&self.columns, &self.filter)
        }
    }

    /// Builds the pipeline configuration from the worker flags.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.fail_on_unsupported {
            config = config.with_unsupported_policy(UnsupportedTypePolicy::Fail);
        }
        config
    }
}

/// Where the export password came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    /// Read from `VAULTSIFT_PASSWORD`
    Environment,
    /// Typed at the terminal
    Prompt,
}

/// Resolves the export password.
///
/// A non-empty `env_value` wins; otherwise `prompt` is asked once.
///
/// # Security
/// The password is never logged; only its source is.
///
/// # Errors
/// Returns a configuration error if prompting fails or the password is empty.
pub fn resolve_password<F>(
    env_value: Option<String>,
    prompt: F,
) -> Result<(Zeroizing<String>, PasswordSource)>
where
    F: FnOnce() -> std::io::Result<String>,
{
    if let Some(value) = env_value.filter(|value| !value.is_empty()) {
        return Ok((Zeroizing::new(value), PasswordSource::Environment));
    }

    let password = Zeroizing::new(
        prompt()
            .map_err(|e| SiftError::configuration(format!("Failed to read password: {}", e)))?,
    );

    if password.is_empty() {
        return Err(SiftError::configuration("Password cannot be empty"));
    }

    Ok((password, PasswordSource::Prompt))
}

/// Reads the export password from `VAULTSIFT_PASSWORD` or the terminal.
///
/// # Errors
/// See [`resolve_password`].
pub fn export_password() -> Result<(Zeroizing<String>, PasswordSource)> {
    resolve_password(std::env::var(PASSWORD_ENV).ok(), || {
        rpassword::prompt_password("Enter export password: ")
    })
}

/// Decrypts an export and applies the plan's filter.
///
/// # Errors
/// Returns pipeline errors, filter evaluation errors, and
/// `SiftError::NoMatch` when a filter matched nothing.
pub async fn sift(
    export: &ExportFile,
    password: &str,
    plan: &QueryPlan,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<DecryptedItem>> {
    let vault = Arc::new(export.unlock(password)?);
    let resolver: Arc<dyn TypeResolver> = vault.clone();
    let session = Session::new(resolver, vault, config);

    let result = session
        .run_pipeline(&export.resources, plan.want_secret, cancel)
        .await;
    session.close();
    let output = result?;

    match &plan.filter {
        Some(expression) => expression.apply(output.items),
        None => Ok(output.items),
    }
}

/// Keeps the items matching the quick search `text`, in order.
///
/// Applied after the filter; blank text keeps everything.
pub fn narrow(mut items: Vec<DecryptedItem>, text: &str) -> Vec<DecryptedItem> {
    let keep: HashSet<usize> = quick_search(&items, text)
        .into_iter()
        .map(|item| item.index)
        .collect();
    items.retain(|item| keep.contains(&item.index));
    items
}

/// Describes a compiled filter for the `check-filter` subcommand.
///
/// # Errors
/// Returns the compile error for an invalid expression.
pub fn describe_filter(expression_text: &str) -> Result<String> {
    if expression_text.trim().is_empty() {
        return Ok("Filter is empty: every record matches".to_string());
    }

    let expression = FilterExpression::compile(expression_text)?;
    let variables: Vec<String> = expression.variables().map(|v| v.to_string()).collect();
    let referenced = if variables.is_empty() {
        "none".to_string()
    } else {
        variables.join(", ")
    };

    Ok(format!(
        "Filter is valid\nReferences: {}\nNeeds secrets: {}",
        referenced,
        if expression.needs_secrets() { "yes" } else { "no" }
    ))
}
