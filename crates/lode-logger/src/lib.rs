use crossterm::{ExecutableCommand, cursor, terminal};
use lode_constants::BIN_NAME;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Diagnostic sink the installer core reports through.
///
/// Implementations decide presentation; callers only supply message text.
pub trait Ui: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn debug(&self, message: &str);

    /// A subprocess about to be spawned.
    fn shell(&self, command: &str) {
        self.debug(&format!("$ {command}"));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
    Shell,
}

impl LogLevel {
    fn prefix(self) -> String {
        match self {
            Self::Info => BIN_NAME.bright_cyan().bold().to_string(),
            Self::Success => "✓".bright_green().bold().to_string(),
            Self::Warning => "⚠".bright_yellow().bold().to_string(),
            Self::Error => "✗".bright_red().bold().to_string(),
            Self::Debug => "•".bright_black().bold().to_string(),
            Self::Shell => "$".bright_blue().bold().to_string(),
        }
    }

    fn paint(self, message: &str) -> String {
        match self {
            Self::Info => message.white().to_string(),
            Self::Success => message.bright_green().to_string(),
            Self::Warning => message.bright_yellow().to_string(),
            Self::Error => message.bright_red().to_string(),
            Self::Debug | Self::Shell => message.bright_black().to_string(),
        }
    }
}

fn level_line(level: LogLevel, message: &str) -> String {
    format!("{} {}", level.prefix(), level.paint(message))
}

fn format_elapsed(elapsed: Duration) -> String {
    match elapsed.as_millis() {
        ms if ms < 1000 => format!("{ms}ms"),
        ms if ms < 60_000 => format!("{:.2}s", elapsed.as_secs_f64()),
        _ => format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60),
    }
}

/// Terminal logger with colored level prefixes. Debug and shell lines only
/// show when `debug` is set.
pub struct Logger {
    start_time: Instant,
    quiet: bool,
    debug: bool,
}

impl Logger {
    #[must_use]
    pub fn new(quiet: bool, debug: bool) -> Self {
        Self {
            start_time: Instant::now(),
            quiet,
            debug,
        }
    }

    #[must_use]
    pub const fn debug_enabled(&self) -> bool {
        self.debug
    }

    fn clear_current_line(&self) {
        if self.quiet {
            return;
        }

        let mut stdout = io::stdout();
        let _ = stdout.execute(cursor::MoveToColumn(0));
        let _ = stdout.execute(terminal::Clear(terminal::ClearType::CurrentLine));
        let _ = stdout.flush();
    }

    fn finish_line(&self, message: &str) {
        if self.quiet {
            return;
        }

        self.clear_current_line();
        println!("{message}");
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.quiet && level != LogLevel::Error {
            return;
        }
        if !self.debug && matches!(level, LogLevel::Debug | LogLevel::Shell) {
            return;
        }

        self.clear_current_line();
        let line = level_line(level, message);
        if level == LogLevel::Error {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    /// Prints `message` with the time since this logger was created.
    pub fn finish(&self, message: &str) {
        let elapsed = format_elapsed(self.start_time.elapsed());
        self.finish_line(&format!(
            "{} {}",
            level_line(LogLevel::Success, message),
            format!("[{elapsed}]").bright_black()
        ));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl Ui for Logger {
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn shell(&self, command: &str) {
        self.log(LogLevel::Shell, command);
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentUi;

impl Ui for SilentUi {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

/// Keeps every message in memory, for assertions.
#[derive(Debug, Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingUi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }

    #[must_use]
    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Ui for RecordingUi {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        self.push(LogLevel::Debug, message);
    }

    fn shell(&self, command: &str) {
        self.push(LogLevel::Shell, command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_ui_keeps_levels() {
        let ui = RecordingUi::new();
        ui.info("fetching");
        ui.warn("careful");
        ui.shell("git fetch");

        assert_eq!(ui.messages().len(), 3);
        assert_eq!(ui.messages_at(LogLevel::Warning), vec!["careful".to_string()]);
        assert_eq!(ui.messages_at(LogLevel::Shell), vec!["git fetch".to_string()]);
    }

    #[test]
    fn test_default_shell_goes_to_debug() {
        struct DebugOnly(RecordingUi);
        impl Ui for DebugOnly {
            fn info(&self, m: &str) {
                self.0.info(m);
            }
            fn warn(&self, m: &str) {
                self.0.warn(m);
            }
            fn error(&self, m: &str) {
                self.0.error(m);
            }
            fn debug(&self, m: &str) {
                self.0.debug(m);
            }
        }

        let ui = DebugOnly(RecordingUi::new());
        ui.shell("svn info");
        assert_eq!(ui.0.messages_at(LogLevel::Debug), vec!["$ svn info".to_string()]);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn test_debug_flag_is_kept() {
        assert!(Logger::new(false, true).debug_enabled());
        assert!(!Logger::default().debug_enabled());
    }

    #[test]
    fn test_quiet_logger_does_not_panic() {
        let logger = Logger::new(true, true);
        logger.info("hidden");
        logger.debug("hidden");
        logger.finish("done");
    }
}
