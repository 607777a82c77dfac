use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter: warnings only, unless `-v` asks for the toolkit's debug events.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "actoolkit=debug,kube=info,warn"
    } else {
        "actoolkit=warn,warn"
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// parseable; `RUST_LOG` wins over the default filter.
///
/// Calling this twice is harmless: the second install is ignored.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let ansi = std::io::stderr().is_terminal();

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("subscriber_already_installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_level() {
        assert!(default_directive(true).contains("actoolkit=debug"));
        assert!(!default_directive(false).contains("debug"));
    }

    #[test]
    fn test_default_directives_parse() {
        for verbose in [true, false] {
            assert!(EnvFilter::try_new(default_directive(verbose)).is_ok());
        }
    }

    #[test]
    fn test_double_init_is_harmless() {
        init(false, false);
        init(true, true);
    }
}
