//! sushi-forms CLI — inspect application definitions and their form schemas.

use clap::Parser;
use std::path::PathBuf;
use sushi_forms::core::library::AppLibrary;
use sushi_forms::core::settings::{self, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sushi-forms",
    version,
    about = "Parse SUSHI application definitions into form schemas without running them"
)]
struct Cli {
    /// Settings file (default: ./sushi-forms.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Definitions directory, overrides the settings file
    #[arg(short, long, global = true, env = "SUSHI_FORMS_DIR")]
    dir: Option<PathBuf>,

    /// Evaluation deadline per definition in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: sushi_forms::cli::Commands,
}

fn load_settings(cli: &Cli) -> Result<Settings, String> {
    let mut settings = settings::load_or_default(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(dir) = &cli.dir {
        settings.definitions_dir.clone_from(dir);
    }
    if let Some(ms) = cli.timeout_ms {
        settings.timeout_ms = ms;
    }
    let errors = settings.validate();
    if !errors.is_empty() {
        return Err(errors.join("; "));
    }
    Ok(settings)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&settings.log_level);

    let library = AppLibrary::from_settings(&settings);
    if let Err(e) = sushi_forms::cli::dispatch(cli.command, &library) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
