//! Various utilities to ease outputting human or machine readable text.

use std::fmt::{Display, Write as _};
use std::io::{IsTerminal, Write};
use std::{env, io};

/// An abstraction for outputting to any format on stdout, the goal is to provide an
/// interface for outputting at the same time both human readable and machine outputs.
#[derive(Debug)]
pub struct Output {
    mode: OutputMode,
    /// Are cursor escape code supported on stdout.
    escape_cursor_cap: bool,
    /// Are color escape code supported on stdout.
    escape_color_cap: bool,
    /// Whether the cursor position has already been saved for the current log line.
    cursor_saved: bool,
}

#[derive(Debug)]
enum OutputMode {
    Human { log_level: LogLevel },
    TabSeparated {},
}

impl Output {
    pub fn human(log_level: LogLevel) -> Self {
        Self::new(OutputMode::Human { log_level })
    }

    pub fn tab_separated() -> Self {
        Self::new(OutputMode::TabSeparated {})
    }

    fn new(mode: OutputMode) -> Self {
        let term_dumb = !io::stdout().is_terminal()
            || (cfg!(unix) && env::var_os("TERM").map(|term| term == "dumb").unwrap_or_default());
        let no_color = env::var_os("NO_COLOR").map(|s| !s.is_empty()).unwrap_or_default();

        Self {
            mode,
            escape_cursor_cap: !term_dumb,
            escape_color_cap: !term_dumb && !no_color,
            cursor_saved: false,
        }
    }

    /// Start a log line identified by `code`, returning a handle to add arguments and
    /// finally a human-readable message.
    pub fn log(&mut self, code: impl Display) -> Log<'_, false> {
        self.start_log(code)
    }

    /// Start a background log line: on human output it overwrites only the background
    /// suffix of the current line (used for in-progress transfer speed/percentage),
    /// on machine output it behaves like a regular log line.
    pub fn log_background(&mut self, code: impl Display) -> Log<'_, true> {
        self.start_log(code)
    }

    fn start_log<const BG: bool>(&mut self, code: impl Display) -> Log<'_, BG> {
        if self.escape_cursor_cap && !self.cursor_saved {
            print!("\x1b[s");
            self.cursor_saved = true;
        }

        let mut shared = LogShared::default();
        if let OutputMode::TabSeparated {} = self.mode {
            write!(shared.line, "{code}").unwrap();
        }

        Log { output: self, shared, flushed: false }
    }

    /// Force the next log line to start on a fresh terminal line instead of overwriting
    /// the current one, used before logging something that must not be clobbered by a
    /// later progress overwrite (e.g. a warning printed mid-transfer).
    pub fn newline(&mut self) {
        if self.escape_cursor_cap && self.cursor_saved {
            println!();
            print!("\x1b[s");
        }
    }
}

/// Internal buffer for the current line being built up.
#[derive(Debug, Default)]
struct LogShared {
    /// Line buffer, machine-readable tab-separated fields or the human message.
    line: String,
    /// For human-readable only: the rendered background suffix (transfer speed etc).
    background: String,
}

/// A handle to a log line, allows adding more context to the log before finalizing it
/// with a level and message.
#[derive(Debug)]
pub struct Log<'a, const BG: bool> {
    output: &'a mut Output,
    shared: LogShared,
    /// Whether the buffer has already reached stdout (human mode flushes immediately).
    flushed: bool,
}

impl<const BG: bool> Log<'_, BG> {
    // Reminder:
    // \x1b[s  save current cursor position
    // \x1b[u  restore saved cursor position
    // \x1b[K  clear the whole line

    /// Append an argument for machine-readable output.
    pub fn arg<D: Display>(&mut self, arg: D) -> &mut Self {
        if let OutputMode::TabSeparated {} = self.output.mode {
            write!(self.shared.line, "\t{arg}").unwrap();
        }
        self
    }

    /// Append many arguments for machine-readable output.
    pub fn args<D, I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = D>,
        D: Display,
    {
        if let OutputMode::TabSeparated {} = self.output.mode {
            for arg in args {
                write!(self.shared.line, "\t{arg}").unwrap();
            }
        }
        self
    }

    fn flush_line_background(&mut self, newline: bool) {
        let mut lock = io::stdout().lock();

        if self.output.escape_cursor_cap {
            lock.write_all(b"\x1b[u\x1b[K").unwrap();
        } else {
            lock.write_all(b"\r").unwrap();
        }

        lock.write_all(self.shared.line.as_bytes()).unwrap();
        lock.write_all(self.shared.background.as_bytes()).unwrap();

        if newline {
            self.shared.line.clear();
            self.shared.background.clear();

            lock.write_all(b"\n").unwrap();
            if self.output.escape_cursor_cap {
                lock.write_all(b"\x1b[s").unwrap();
            }
        }

        lock.flush().unwrap();
        self.flushed = true;
    }
}

impl Log<'_, false> {
    /// Associate a human-readable message with this log line at the given level; on
    /// machine output the level only affects nothing (machine output is always
    /// verbose), it only gates whether human output is printed at all.
    pub fn line<D: Display>(&mut self, level: LogLevel, message: D) -> &mut Self {
        if let OutputMode::Human { log_level } = self.output.mode {
            if level >= log_level {
                let (name, color) = match level {
                    LogLevel::Pending => ("..", ""),
                    LogLevel::Info => ("INFO", "\x1b[34m"),
                    LogLevel::Success => ("OK", "\x1b[92m"),
                    LogLevel::Warning => ("WARN", "\x1b[33m"),
                    LogLevel::Error => ("FAILED", "\x1b[31m"),
                };

                self.shared.line.clear();
                if !self.output.escape_color_cap || color.is_empty() {
                    write!(self.shared.line, "[{name:^6}] {message}").unwrap();
                } else {
                    write!(self.shared.line, "[{color}{name:^6}\x1b[0m] {message}").unwrap();
                }

                self.flush_line_background(level != LogLevel::Pending);
            }
        }
        self
    }

    /// Print an indented follow-up line below the current one; never overwritten,
    /// used for extra detail attached to a warning or error.
    pub fn additional<D: Display>(&mut self, message: D) -> &mut Self {
        match self.output.mode {
            OutputMode::Human { log_level } if LogLevel::Info >= log_level => {
                println!("         {message}");
                if self.output.escape_cursor_cap {
                    print!("\x1b[s");
                }
            }
            OutputMode::TabSeparated {} => {
                write!(self.shared.line, "\t{message}").unwrap();
            }
            _ => {}
        }
        self
    }

    #[inline]
    pub fn pending<D: Display>(&mut self, message: D) -> &mut Self {
        self.line(LogLevel::Pending, message)
    }

    #[inline]
    pub fn info<D: Display>(&mut self, message: D) -> &mut Self {
        self.line(LogLevel::Info, message)
    }

    #[inline]
    pub fn success<D: Display>(&mut self, message: D) -> &mut Self {
        self.line(LogLevel::Success, message)
    }

    #[inline]
    pub fn warning<D: Display>(&mut self, message: D) -> &mut Self {
        self.line(LogLevel::Warning, message)
    }

    #[inline]
    pub fn error<D: Display>(&mut self, message: D) -> &mut Self {
        self.line(LogLevel::Error, message)
    }
}

impl Log<'_, true> {
    /// Set the human-readable message of this background log, overwriting whatever
    /// background message is currently shown on the current log line.
    pub fn message<D: Display>(&mut self, message: D) -> &mut Self {
        if let OutputMode::Human { .. } = self.output.mode {
            self.shared.background.clear();
            write!(self.shared.background, "{message}").unwrap();
            self.flush_line_background(false);
        }
        self
    }
}

/// Flush machine-readable lines that were only buffered (human output is always
/// flushed immediately as each call happens).
impl<const BG: bool> Drop for Log<'_, BG> {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        if let OutputMode::TabSeparated {} = self.output.mode {
            let mut lock = io::stdout().lock();
            lock.write_all(self.shared.line.as_bytes()).unwrap();
            lock.write_all(b"\n").unwrap();
            lock.flush().unwrap();
        }
    }
}

/// Level for a human-readable log line, ordered from least to most severe so a
/// configured verbosity threshold can filter with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Something is in progress and its outcome is not yet known.
    Pending,
    /// Indicative, discarded unless verbose mode is on.
    Info,
    /// A success.
    Success,
    /// A warning.
    Warning,
    /// An error.
    Error,
}
