//! Logging initialization.
//!
//! Console output goes to stdout, except ERROR events which go to stderr.
//! With `--log-file`, an additional JSON layer writes to the given path
//! through a non-blocking writer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the `debug` flag. Returns the file
/// writer's [`WorkerGuard`] when a log file is configured; it must be held
/// for the lifetime of the program so buffered lines are flushed.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (subscriber, guard) = build_tracing(debug, log_file)?;
    subscriber.init();
    Ok(guard)
}

/// Build the subscriber without registering it globally.
fn build_tracing(
    debug: bool,
    log_file: Option<&Path>,
) -> Result<(impl tracing::Subscriber + Send + Sync, Option<WorkerGuard>)> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = open_log_writer(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter(debug));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(debug)
        .with_writer(std::io::stderr.with_max_level(Level::ERROR).or_else(std::io::stdout))
        .with_filter(env_filter(debug));

    let subscriber = tracing_subscriber::registry().with(console).with(file_layer);
    Ok((subscriber, guard))
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(debug)))
}

/// Filter used when `RUST_LOG` is unset.
fn default_directives(debug: bool) -> &'static str {
    if debug {
        "info,ghquick=debug,ghquick_core=debug,ghquick_pm=debug"
    } else {
        "info"
    }
}

/// Create the log file (and its parent directories) behind a non-blocking writer.
fn open_log_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
    }

    let file = fs::File::create(path)
        .with_context(|| format!("failed to create log file: {}", path.display()))?;

    Ok(tracing_appender::non_blocking(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_pick_default_directives() {
        assert_eq!(default_directives(false), "info");
        assert!(default_directives(true).contains("ghquick_core=debug"));
    }

    #[test]
    fn test_should_create_log_file_with_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("nested").join("ghquick.log");

        let (_writer, _guard) = open_log_writer(&path).unwrap();

        assert!(path.is_file(), "log file should be created");
    }

    #[test]
    fn test_should_return_error_for_invalid_log_path() {
        let result = open_log_writer(Path::new("/dev/null/ghquick.log"));
        assert!(result.is_err(), "should fail when directory cannot be created");
    }

    #[test]
    fn test_should_return_no_guard_without_log_file() {
        let (_subscriber, guard) = build_tracing(false, None).unwrap();
        assert!(guard.is_none());
    }

    #[test]
    fn test_should_write_json_lines_to_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ghquick.log");

        let (subscriber, guard) = build_tracing(true, Some(&path)).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(repo = "demo", "changes pushed");
        });
        // Dropping the guard flushes the background writer.
        drop(guard);

        let content = fs::read_to_string(&path).unwrap();
        let line = content.lines().next().expect("should write a line");
        assert!(line.starts_with('{'));
        assert!(line.contains("changes pushed"));
        assert!(line.contains("\"repo\":\"demo\""));
    }
}
