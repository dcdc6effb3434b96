//! SF-009: Sandboxed evaluation of application definitions.
//!
//! Legacy `<Name>App.rb` files are never handed to an interpreter that can
//! touch the host. They are tokenized and the app class is located
//! structurally; only the `initialize` and `set_default_parameters` hooks
//! are parsed into a small statement tree and run against a fresh
//! descriptor. Helpers the definitions rely on are stubs with no I/O, and
//! anything else reached during execution is rejected.
//!
//! Declarative `<Name>App.yaml` files go through [`crate::core::parser`].

pub mod eval;
pub mod lexer;
pub mod parser;

use crate::core::catalog::CatalogEntry;
use crate::core::error::EvaluationError;
use crate::core::types::{ApplicationDescriptor, DefinitionFormat};
use std::cell::Cell;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default wall-clock limit for one evaluation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default cap on definition file size.
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 256 * 1024;

/// Limits applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    pub timeout: Duration,
    pub max_source_bytes: u64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

/// Failure inside the script sandbox, before a path is attached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },
    #[error("evaluation deadline exceeded")]
    Timeout,
}

/// Wall-clock deadline shared by the lexer, parser and interpreter of one
/// evaluation.
#[derive(Debug)]
pub struct Budget {
    deadline: Option<Instant>,
    ticks: Cell<u32>,
}

/// The clock is read once per this many checks.
const CHECK_INTERVAL: u32 = 64;

impl Budget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ticks: Cell::new(0),
        }
    }

    pub fn check(&self) -> Result<(), SandboxError> {
        let tick = self.ticks.get();
        self.ticks.set(tick.wrapping_add(1));
        if tick % CHECK_INTERVAL != 0 {
            return Ok(());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SandboxError::Timeout),
            _ => Ok(()),
        }
    }
}

/// Load and evaluate one catalog entry.
pub fn evaluate(entry: &CatalogEntry, options: &EvalOptions) -> Result<ApplicationDescriptor, EvaluationError> {
    let started = Instant::now();
    let source = read_source(&entry.path, options)?;
    let result = evaluate_source(&source, entry.format, &entry.name, &entry.path, options);
    tracing::debug!(
        app = %entry.name,
        format = %entry.format,
        elapsed_us = started.elapsed().as_micros() as u64,
        ok = result.is_ok(),
        "evaluated definition"
    );
    result
}

/// Evaluate definition text that has already been read.
///
/// `fallback_name` becomes the descriptor name when the definition leaves
/// it empty; `path` is only used for error reporting.
pub fn evaluate_source(
    source: &str,
    format: DefinitionFormat,
    fallback_name: &str,
    path: &Path,
    options: &EvalOptions,
) -> Result<ApplicationDescriptor, EvaluationError> {
    match format {
        DefinitionFormat::Declarative => {
            crate::core::parser::load_definition(source, fallback_name).map_err(|message| {
                EvaluationError::Parse {
                    path: path.to_path_buf(),
                    line: None,
                    message,
                }
            })
        }
        DefinitionFormat::Script => {
            run_script(source, fallback_name, options.timeout).map_err(|e| match e {
                SandboxError::Timeout => EvaluationError::Timeout {
                    path: path.to_path_buf(),
                    limit: options.timeout,
                },
                SandboxError::Syntax { line, message } | SandboxError::Runtime { line, message } => {
                    EvaluationError::Parse {
                        path: path.to_path_buf(),
                        line: Some(line),
                        message,
                    }
                }
            })
        }
    }
}

fn run_script(source: &str, fallback_name: &str, timeout: Duration) -> Result<ApplicationDescriptor, SandboxError> {
    let budget = Budget::new(timeout);
    let tokens = lexer::tokenize(source, &budget)?;
    let class = parser::parse_program(tokens, &budget)?;

    let mut app = ApplicationDescriptor::new();
    app.class_name = class.class_name.clone();
    eval::Interpreter::new(&mut app, &budget).run(&class)?;

    if app.name.is_empty() {
        app.name = fallback_name.to_string();
    }
    Ok(app)
}

/// Read a definition file, refusing symlinks, oversized files and
/// non-UTF-8 content.
fn read_source(path: &Path, options: &EvalOptions) -> Result<String, EvaluationError> {
    let io_err = |source: std::io::Error| EvaluationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parse_err = |message: String| EvaluationError::Parse {
        path: path.to_path_buf(),
        line: None,
        message,
    };

    let meta = std::fs::symlink_metadata(path).map_err(io_err)?;
    if !meta.file_type().is_file() {
        return Err(io_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "definition is not a regular file",
        )));
    }

    let file = std::fs::File::open(path).map_err(io_err)?;
    let mut bytes = Vec::new();
    file.take(options.max_source_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(io_err)?;
    if bytes.len() as u64 > options.max_source_bytes {
        return Err(parse_err(format!(
            "definition exceeds {} bytes",
            options.max_source_bytes
        )));
    }
    String::from_utf8(bytes).map_err(|_| parse_err("definition is not valid UTF-8".to_string()))
}
