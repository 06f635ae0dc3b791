use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Dependencies whose output is hidden below Trace level.
const FILTERED_MODULES: &[&str] = &["tower", "tracing", "hyper", "axum", "redis", "tungstenite"];

pub struct Logger {}

impl Logger {
    /// Installs the global terminal logger at the configured level.
    ///
    /// Fails only if a logger was already installed in this process.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        TermLogger::init(
            config.log_level_filter,
            Self::build_log_config(config.log_level_filter),
            TerminalMode::Mixed,
            Self::color_choice(config.is_production()),
        )
    }

    // Production output goes to log collectors, not a terminal
    fn color_choice(is_production: bool) -> ColorChoice {
        if is_production {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        }
    }

    fn filtered_modules(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            FILTERED_MODULES
        }
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for &module in Self::filtered_modules(level) {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_level_shows_dependency_output() {
        assert!(Logger::filtered_modules(LevelFilter::Trace).is_empty());

        for level in [LevelFilter::Error, LevelFilter::Info, LevelFilter::Debug] {
            let filtered = Logger::filtered_modules(level);
            assert!(filtered.contains(&"redis"));
            assert!(filtered.contains(&"tungstenite"));
        }
    }

    #[test]
    fn test_own_crates_are_never_filtered() {
        for module in ["realtime", "events", "web", "service"] {
            assert!(!FILTERED_MODULES.contains(&module), "{module} must not be filtered");
        }
    }

    #[test]
    fn test_production_output_is_uncolored() {
        assert!(matches!(Logger::color_choice(true), ColorChoice::Never));
        assert!(matches!(Logger::color_choice(false), ColorChoice::Auto));
    }
}
