//! SF-017: CLI subcommands — list, show, check.

use crate::core::api::{self, ErrorResponse};
use crate::core::digest;
use crate::core::error::LookupError;
use crate::core::library::AppLibrary;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List application names found in the definitions directory
    List {
        /// Print the index envelope as JSON
        #[arg(long)]
        json: bool,

        /// Append each definition file's BLAKE3 digest and a catalog digest
        #[arg(long)]
        digest: bool,
    },

    /// Print one application's form schema as JSON
    Show {
        /// Application name (case-insensitive)
        name: String,

        /// Print the config fingerprint instead of the schema
        #[arg(long)]
        fingerprint: bool,
    },

    /// Evaluate every definition and report failures
    Check,
}

/// Dispatch a CLI command against a library.
pub fn dispatch(cmd: Commands, library: &AppLibrary) -> Result<(), String> {
    match cmd {
        Commands::List { json, digest } => cmd_list(library, json, digest),
        Commands::Show { name, fingerprint } => cmd_show(library, &name, fingerprint),
        Commands::Check => cmd_check(library),
    }
}

fn cmd_list(library: &AppLibrary, json: bool, with_digest: bool) -> Result<(), String> {
    if json {
        let body = serde_json::to_string_pretty(&api::index(library))
            .map_err(|e| format!("cannot serialize index: {}", e))?;
        println!("{}", body);
        return Ok(());
    }

    for line in list_lines(library, with_digest)? {
        println!("{}", line);
    }
    Ok(())
}

/// One line per definition: the name, optionally followed by its digest.
/// With digests, a final `*` line carries the digest of the whole catalog.
fn list_lines(library: &AppLibrary, with_digest: bool) -> Result<Vec<String>, String> {
    let entries = library.catalog().entries();
    let mut lines = Vec::with_capacity(entries.len() + 1);
    for entry in &entries {
        if with_digest {
            let hash = digest::definition_digest(&entry.path)?;
            lines.push(format!("{}  {}", entry.name, hash));
        } else {
            lines.push(entry.name.clone());
        }
    }
    if with_digest {
        lines.push(format!("*  {}", digest::catalog_digest(&entries)?));
    }
    Ok(lines)
}

fn cmd_show(library: &AppLibrary, name: &str, fingerprint: bool) -> Result<(), String> {
    match api::show(library, name) {
        Ok(envelope) => {
            if fingerprint {
                println!("{}", digest::config_fingerprint(&envelope.application)?);
            } else {
                let body = serde_json::to_string_pretty(&envelope)
                    .map_err(|e| format!("cannot serialize config: {}", e))?;
                println!("{}", body);
            }
            Ok(())
        }
        Err(response) => {
            print_error_body(&response);
            Err(format!("{} (status {})", response.error, response.status))
        }
    }
}

fn print_error_body(response: &ErrorResponse) {
    if let Ok(body) = serde_json::to_string_pretty(response) {
        println!("{}", body);
    }
}

fn cmd_check(library: &AppLibrary) -> Result<(), String> {
    let report = check_all(library);
    for (name, outcome) in &report {
        match outcome {
            Ok(params) => println!("  OK    {} ({} params)", name, params),
            Err(e) => println!("  ERROR {}: {}", name, e),
        }
    }

    let failed = report.iter().filter(|(_, r)| r.is_err()).count();
    println!();
    println!("{} definitions, {} failed", report.len(), failed);
    if failed > 0 {
        return Err(format!("{} definition(s) failed to evaluate", failed));
    }
    Ok(())
}

/// Evaluate every listed definition. `Ok` carries the parameter count.
fn check_all(library: &AppLibrary) -> Vec<(String, Result<usize, String>)> {
    library
        .list_applications()
        .into_iter()
        .map(|name| {
            let outcome = library
                .evaluate_application(&name)
                .map(|app| app.params.len())
                .map_err(|e| match e {
                    LookupError::Internal(inner) => inner.to_string(),
                    other => other.to_string(),
                });
            (name, outcome)
        })
        .collect()
}
