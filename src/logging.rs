use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::SystemTime;

static BOOT_TIME: OnceLock<SystemTime> = OnceLock::new();

#[allow(dead_code)]
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Logger that prints colored, boot-relative-timestamped lines over serial.
struct StationLogger;

impl log::Log for StationLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Time since boot
        let boot_time = BOOT_TIME.get_or_init(SystemTime::now);
        let elapsed = SystemTime::now()
            .duration_since(*boot_time)
            .unwrap_or_default();
        let seconds = elapsed.as_secs();
        let millis = elapsed.subsec_millis();
        let ts_compact = if seconds < 60 {
            format!("{:>3}.{:03}s", seconds, millis)
        } else if seconds < 3600 {
            format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
        } else {
            format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
        };

        let (color, level_char) = match record.level() {
            Level::Error => (colors::BRIGHT_RED, 'E'),
            Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
            Level::Info => (colors::BRIGHT_GREEN, 'I'),
            Level::Debug => (colors::BRIGHT_BLUE, 'D'),
            Level::Trace => (colors::GRAY, 'T'),
        };
        let module = record
            .module_path()
            .unwrap_or("unknown")
            .split("::")
            .last()
            .unwrap_or("unknown");
        let module_display = if module.len() > 12 { &module[..12] } else { module };

        println!(
            "{}{} [{}] {:>12} | {}{}",
            color,
            ts_compact,
            level_char,
            module_display,
            record.args(),
            colors::RESET
        );
    }

    fn flush(&self) {}
}

static LOGGER: StationLogger = StationLogger;

/// Initialize the logger with colors and boot-relative timestamps.
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(SystemTime::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Debug);
    Ok(())
}
