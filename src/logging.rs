//! Global logger

use core::fmt::{self, Write};

use lazy_static::*;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Where log lines end up; the kernel hands in its console at boot
pub trait Console: Send + Sync {
    /// Emit a piece of text
    fn write_str(&self, s: &str);
}

lazy_static! {
    static ref CONSOLE: Mutex<Option<&'static dyn Console>> = Mutex::new(None);
}

struct ConsoleWriter(&'static dyn Console);

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Add escape sequence to print with color in Linux console
macro_rules! with_color {
    ($args: ident, $color_code: ident) => {{
        format_args!("\u{1B}[{}m{}\u{1B}[0m", $color_code as u8, $args)
    }};
}

/// Print msg with color
pub fn print_in_color(args: fmt::Arguments, color_code: u8) {
    // one line at a time
    let console = CONSOLE.lock();
    if let Some(console) = *console {
        let _ = ConsoleWriter(console).write_fmt(with_color!(args, color_code));
    }
}

/// a simple logger
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        print_in_color(
            format_args!(
                "[{:>5}][{}:{}] {}\n",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            ),
            color,
        );
    }
    fn flush(&self) {}
}

fn level_from_env(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Error,
    }
}

/// initiate logger, level from `LOG` at build time
pub fn init(console: &'static dyn Console) -> Result<(), log::SetLoggerError> {
    static LOGGER: SimpleLogger = SimpleLogger;
    *CONSOLE.lock() = Some(console);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_from_env(option_env!("LOG")));
    Ok(())
}
