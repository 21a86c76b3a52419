use std::sync::Once;

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

static LOGGER_INIT: Once = Once::new();

/// Default location of the log4rs configuration.
pub const LOG_CONFIG_FILE: &str = "log4rs.yaml";

/// Initializes `log4rs` from [`LOG_CONFIG_FILE`], falling back to a console
/// logger at `fallback_level` when the file is missing or invalid. Only the
/// first call has any effect.
pub fn init(fallback_level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        match log4rs::init_file(LOG_CONFIG_FILE, Default::default()) {
            Ok(_) => {
                log::info!("Logging initialized from {LOG_CONFIG_FILE}.");
            }
            Err(e) => {
                eprintln!(
                    "ERROR: Failed to load logger from {LOG_CONFIG_FILE}: {e}"
                );
                eprintln!("Falling back to stderr logging ({fallback_level}).");
                init_console(fallback_level);
            }
        }
    });
}

fn init_console(level: LevelFilter) {
    let console = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)(utc)} - {l} {t}: {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(Root::builder().appender("console").build(level));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("ERROR: Failed to initialize fallback logger: {e}");
            } else {
                log::warn!("Logging initialized using fallback ({level}).");
            }
        }
        Err(e) => {
            eprintln!("ERROR: Failed to build fallback logger config: {e}");
        }
    }
}
