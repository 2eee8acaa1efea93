use std::path::Path;
use std::process::Command;

use lode_constants::BUILD_FLAGS_ENV;
use lode_error::{LodeError, Result};
use lode_logger::Ui;
use lode_spec::PackageSpec;

/// Runs the spec's native build command inside `dir`, exposing `flags` to
/// the child through `LODE_BUILD_FLAGS`.
pub fn run_build(
    spec: &PackageSpec,
    dir: &Path,
    flags: Option<&[String]>,
    ui: &dyn Ui,
) -> Result<()> {
    let Some(script) = spec.build.as_deref() else {
        return Ok(());
    };

    ui.info(&format!("Building native extensions for {spec}"));
    ui.shell(script);

    let mut command = if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", script]);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    };
    command.current_dir(dir);
    if let Some(flags) = flags {
        command.env(BUILD_FLAGS_ENV, flags.join(" "));
    }

    let output = command
        .output()
        .map_err(|e| LodeError::command(script, format!("failed to spawn build: {e}")))?;
    if output.status.success() {
        return Ok(());
    }

    let mut captured = String::from_utf8_lossy(&output.stdout).to_string();
    captured.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(LodeError::command(script, captured))
}
