//! Tracing subscriber setup shared by the three binaries.

use crate::config::Config;

/// Install the global fmt subscriber. `ENABLE_DEBUG` forces debug-level
/// output regardless of `LOG_LEVEL`.
pub fn init(config: &Config) {
    let level = if config.enable_debug {
        tracing::Level::DEBUG
    } else {
        config.log_level.as_tracing_level()
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
