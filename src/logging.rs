use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

pub const DEFAULT_LOG_CONFIG: &str = "log4rs.yml";

const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}";

/// Install the log4rs backend from `path`, or a console logger at `info`
/// when the file is missing or unreadable.
pub fn init(path: impl AsRef<Path>) {
    let path = path.as_ref();
    let file_error = if path.exists() {
        match log4rs::init_file(path, Default::default()) {
            Ok(()) => return,
            Err(e) => Some(e.to_string()),
        }
    } else {
        None
    };

    match init_console(LevelFilter::Info) {
        Ok(()) => {
            if let Some(e) = file_error {
                log::warn!("Ignoring {}: {}; logging to console only", path.display(), e);
            }
        }
        Err(e) => eprintln!("logging disabled: {}", e),
    }
}

fn init_console(level: LevelFilter) -> Result<(), String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| e.to_string())?;
    log4rs::init_config(config).map(|_| ()).map_err(|e| e.to_string())
}
