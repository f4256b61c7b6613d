// Logging setup shared by the command line tools

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,compress_offload=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber
///
/// Logs go to stderr, or to a daily rotating file under `log_dir` when one is
/// given. `RUST_LOG` overrides the level picked by `verbose`.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>, file_prefix: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;

            // Daily rotating file appender
            let file_appender = tracing_appender::rolling::daily(dir, format!("{file_prefix}.log"));
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            let subscriber = tracing_subscriber::fmt()
                .with_writer(file_writer)
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_env_filter(filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;

            // Keep the writer thread alive for the life of the process
            std::mem::forget(guard);
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_env_filter(filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true), "info,compress_offload=debug");
        assert_eq!(default_filter(false), "warn");
    }
}
