use std::path::Path;
use std::process::{Command, Output};

use lode_error::{LodeError, Result};
use lode_logger::Ui;

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn(program: &str, args: &[&str], dir: Option<&Path>, ui: &dyn Ui) -> Result<Output> {
    let rendered = render(program, args);
    ui.shell(&rendered);

    let mut command = Command::new(program);
    command
        .args(args)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    command
        .output()
        .map_err(|e| LodeError::command(rendered, format!("failed to spawn {program}: {e}")))
}

/// Runs `program`, returning trimmed stdout or a `Command` error carrying
/// the command line and captured output.
pub fn run(program: &str, args: &[&str], dir: Option<&Path>, ui: &dyn Ui) -> Result<String> {
    let output = spawn(program, args, dir, ui)?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let mut captured = String::from_utf8_lossy(&output.stderr).to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        captured.push_str(&stdout);
    }
    Err(LodeError::command(render(program, args), captured))
}

/// True iff the command exits successfully.
#[must_use]
pub fn succeeds(program: &str, args: &[&str], dir: Option<&Path>, ui: &dyn Ui) -> bool {
    spawn(program, args, dir, ui).is_ok_and(|output| output.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_logger::{LogLevel, RecordingUi};

    #[cfg(unix)]
    #[test]
    fn test_run_captures_stdout() {
        let ui = RecordingUi::new();
        let out = run("sh", &["-c", "echo hello"], None, &ui).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(ui.messages_at(LogLevel::Shell), vec!["sh -c echo hello"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_includes_command_and_stderr() {
        let ui = RecordingUi::new();
        let err = run("sh", &["-c", "echo broken >&2; exit 3"], None, &ui).unwrap_err();
        match err {
            LodeError::Command { command, output } => {
                assert_eq!(command, "sh -c echo broken >&2; exit 3");
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_a_command_error() {
        let ui = RecordingUi::new();
        let err = run("lode-definitely-missing-binary", &[], None, &ui).unwrap_err();
        assert!(err.is_source_error());
        assert!(!succeeds("lode-definitely-missing-binary", &[], None, &ui));
    }
}
