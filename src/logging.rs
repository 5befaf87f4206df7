//! Tracing setup: human-readable lines on stderr, optionally JSON to a file.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Error)]
pub(crate) enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("cannot create log file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// `RUST_LOG` wins over the verbosity flags when it is set.
pub(crate) fn init_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(verbosity, quiet))?,
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 1)
        .with_ansi(std::io::stderr().is_terminal());

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if let Some(path) = log_file {
        let file = std::fs::File::create(path).map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .json();
        tracing::subscriber::set_global_default(subscriber.with(file_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn default_filter(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 => "trac_hub_migrate=info",
        1 => "trac_hub_migrate=debug",
        2 => "trac_hub_migrate=debug,octocrab=debug",
        _ => "trac_hub_migrate=trace,octocrab=debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(default_filter(3, true), "warn");
    }

    #[test]
    fn every_default_filter_parses() {
        for verbosity in 0..4 {
            EnvFilter::try_new(default_filter(verbosity, false)).unwrap();
        }
    }
}
