use std::path::{Path, PathBuf};
use std::process::Command;

/// Locates an executable on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

/// Runs a command to completion and returns its stdout. On failure the error
/// carries the trimmed stderr, or a generic message when stderr is empty.
pub fn run_cmd(program: &Path, args: &[String], cwd: Option<&Path>) -> Result<Vec<u8>, String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|err| format!("failed to run {}: {err}", program.display()))?;
    if output.status.success() {
        return Ok(output.stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Err(format!(
            "command failed ({}): {}",
            output.status,
            program.display()
        ))
    } else {
        Err(stderr)
    }
}
