//! A [`log::Log`] implementation that writes records into any [`fmt::Write`] sink.
//!
//! The kernel installs a [`Logger`] around its console, and every record
//! the allocator emits through the `log` macros ends up there.

use core::{
    fmt::{self, Write},
    marker::PhantomData,
    time::Duration,
};
use owo_colors::{colors, Color, OwoColorize};
use spin::{Mutex, MutexGuard};

/// Represents any level of a log message.
pub trait Level {
    type Color: Color;

    const NAME: &'static str;
}

/// The trace log level.
pub enum Trace {}
impl Level for Trace {
    type Color = colors::Blue;
    const NAME: &'static str = "Trace";
}

/// The debug log level.
pub enum Debug {}
impl Level for Debug {
    type Color = colors::Magenta;
    const NAME: &'static str = "Debug";
}

/// The info log level.
pub enum Info {}
impl Level for Info {
    type Color = colors::Cyan;
    const NAME: &'static str = "Info";
}

/// The warn log level.
pub enum Warn {}
impl Level for Warn {
    type Color = colors::Yellow;
    const NAME: &'static str = "Warn";
}

/// The error log level.
pub enum Error {}
impl Level for Error {
    type Color = colors::Red;
    const NAME: &'static str = "Error";
}

/// Logger that prints every record into the wrapped sink.
pub struct Logger<W> {
    sink: Mutex<W>,
    clock: Option<fn() -> Duration>,
}

impl<W> Logger<W> {
    /// Create a logger that prints records without a timestamp.
    pub const fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            clock: None,
        }
    }

    /// Create a logger that prefixes every line with the time returned by `clock`.
    pub const fn with_clock(sink: W, clock: fn() -> Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            clock: Some(clock),
        }
    }

    /// Lock the sink of this logger.
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.sink.lock()
    }
}

impl<W: Write + Send> Logger<W> {
    fn write<L: Level>(&self, record: &log::Record<'_>) -> fmt::Result {
        let module = record
            .module_path_static()
            .or_else(|| record.module_path())
            .unwrap_or("<n/a>");

        let mut guard = self.sink.lock();
        let mut writer = LogWriter {
            prefix: true,
            time: self.clock.map(|clock| clock()),
            module,
            guard: &mut *guard,
            _level: PhantomData::<L>,
        };

        writeln!(writer, "{}", record.args())
    }
}

impl<W: Write + Send> log::Log for Logger<W> {
    #[allow(unused_variables)]
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        #[cfg(any(debug_assertions, feature = "logging"))]
        return true;
        #[cfg(all(not(debug_assertions), not(feature = "logging")))]
        return metadata.level() <= log::Level::Info;
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // a failing sink has nowhere to report to
        let _ = match record.level() {
            log::Level::Error => self.write::<Error>(record),
            log::Level::Warn => self.write::<Warn>(record),
            log::Level::Info => self.write::<Info>(record),
            log::Level::Debug => self.write::<Debug>(record),
            log::Level::Trace => self.write::<Trace>(record),
        };
    }

    fn flush(&self) {}
}

struct LogWriter<'fmt, L, G> {
    prefix: bool,
    time: Option<Duration>,
    module: &'fmt str,
    guard: &'fmt mut G,
    _level: PhantomData<L>,
}

impl<L: Level, G: Write> LogWriter<'_, L, G> {
    fn print_prefix(&mut self) -> fmt::Result {
        if let Some(time) = self.time {
            let secs = time.as_secs();
            let millis = time.subsec_millis();
            write!(
                self.guard,
                "{} ",
                format_args!("[{:>3}.{:<03}]", secs, millis).dimmed()
            )?;
        }

        write!(
            self.guard,
            "{:>5} {} > ",
            L::NAME.fg::<L::Color>(),
            self.module,
        )
    }
}

impl<L: Level, G: Write> fmt::Write for LogWriter<'_, L, G> {
    fn write_str(&mut self, mut s: &str) -> fmt::Result {
        // every line gets its own prefix
        while !s.is_empty() {
            if self.prefix {
                self.print_prefix()?;
                self.prefix = false;
            }

            match s.find('\n') {
                Some(newline) => {
                    let (line, rest) = s.split_at(newline + 1);
                    self.guard.write_str(line)?;
                    self.prefix = true;
                    s = rest;
                }
                None => {
                    self.guard.write_str(s)?;
                    break;
                }
            }
        }

        Ok(())
    }
}
