use std::io::IsTerminal;

use crate::ansiterm::{self, AnsiEscapeSequence};

/// Dummy type to help us implement a logger using the `log` crate.
struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Report lines go to stdout; diagnostics never do.
        if !std::io::stderr().is_terminal() {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
            return;
        }

        let color = match record.level() {
            log::Level::Error => ansiterm::Color::Red,
            log::Level::Warn => ansiterm::Color::Yellow,
            log::Level::Info => ansiterm::Color::Green,
            log::Level::Debug => ansiterm::Color::Cyan,
            // White is actually kinda grey. Bright white is white.
            log::Level::Trace => ansiterm::Color::White,
        };
        let color_code = AnsiEscapeSequence::foreground(color);
        let clear = ansiterm::CLEAR_FORMAT;

        eprintln!(
            "{color_code}[{}]{clear} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

pub(crate) fn init(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    log::debug!("Logging initialized at {level}");
    Ok(())
}
