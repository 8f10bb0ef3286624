//! Logger setup for native hosts

use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` uses the `env_logger` filter syntax, e.g. `"cloth_engine=debug,wgpu=warn"`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

static INIT: Once = Once::new();

/// Install the global logger. Later calls are ignored.
///
/// Falls back to `RUST_LOG`, then to `info` with wgpu's internals held at `warn`.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = &config.env_filter {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder
                .filter_level(log::LevelFilter::Info)
                .filter_module("wgpu_core", log::LevelFilter::Warn)
                .filter_module("wgpu_hal", log::LevelFilter::Warn)
                .filter_module("naga", log::LevelFilter::Warn);
        }

        builder.write_style(config.write_style);

        // A test harness may already have installed a logger
        if builder.try_init().is_err() {
            log::debug!("logger already installed");
        }
        log::debug!("logging initialized");
    });
}
