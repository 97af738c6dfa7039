use std::{
    fs::{self, OpenOptions},
    sync::Mutex,
};

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};
use weather_core::{
    Config,
    config::{DEFAULT_LOG_LEVEL, LogFormat},
};

/// Libraries that are noisy below `warn`.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Filter directive for the configured level; `--verbose` wins.
fn filter_directive(level: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level };
    std::iter::once(level).chain(QUIET_TARGETS.iter().copied()).collect::<Vec<_>>().join(",")
}

/// Install the global subscriber. Logs go to stderr, or appended to
/// `LOG_FILE` (without colours) when set.
pub fn init(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter_directive(&config.log_level.value, verbose))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let (writer, ansi) = match &config.log_file.value {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false);

    let result = match config.log_format.value {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    result.map_err(|err| anyhow::anyhow!("{err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_forces_debug() {
        assert!(filter_directive("warn", true).starts_with("debug,"));
        assert!(filter_directive("error", false).starts_with("error,"));
        assert!(filter_directive("info", false).contains("hyper=warn"));
    }
}
