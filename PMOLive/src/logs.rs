// logs.rs
use anyhow::Result;
use pmoconfig::Config;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Registry, filter::LevelFilter, layer::SubscriberExt, reload,
    util::SubscriberInitExt,
};

/// Permet de changer le niveau de log à chaud
pub struct LogControl {
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogControl {
    pub fn set_max_level(&self, level: Level) -> Result<()> {
        self.reload_handle.reload(LevelFilter::from_level(level))?;
        Ok(())
    }
}

/// Initialise le système de logging à partir de la configuration
///
/// `host.logger.min_level` sets the starting level and
/// `host.logger.enable_console` adds the terminal output. When `RUST_LOG` is
/// set, its directives are applied on top of the configured level.
pub fn init_logging(config: &Config) -> LogControl {
    let log_level = match config.get_log_min_level() {
        Ok(l) => match string_to_level(&l) {
            Some(lev) => LevelFilter::from_level(lev),
            None => LevelFilter::INFO,
        },
        Err(_) => LevelFilter::INFO,
    };

    let (filter, reload_handle) = reload::Layer::new(log_level);

    let subscriber = Registry::default()
        .with(filter)
        .with(EnvFilter::try_from_default_env().ok());

    let enable_console = config.get_log_enable_console().unwrap_or(true);

    if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }

    LogControl { reload_handle }
}

pub fn string_to_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
