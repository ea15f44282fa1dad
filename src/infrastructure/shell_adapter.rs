use std::process::{Command, Output};

use anyhow::{Context, Result};

use crate::domain::ports::ShellAdapter;

#[derive(Debug, Default)]
pub struct CommandShellAdapter;

impl ShellAdapter for CommandShellAdapter {
    fn run_capture(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute command: {program}"))?;
        stdout_or_error(program, output)
    }

    fn run_command_line(&self, command_line: &str) -> Result<String> {
        #[cfg(target_os = "windows")]
        let output = Command::new("cmd")
            .args(["/C", command_line])
            .output()
            .context("failed to execute command line via cmd")?;

        #[cfg(not(target_os = "windows"))]
        let output = Command::new("sh")
            .args(["-c", command_line])
            .output()
            .context("failed to execute command line via sh")?;

        tracing::debug!(command = %command_line, status = %output.status, "command line finished");
        stdout_or_error("command line", output)
    }
}

fn stdout_or_error(what: &str, output: Output) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        anyhow::bail!("{what} exited with status {}: {detail}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn failing_command_reports_stderr() {
        let err = CommandShellAdapter
            .run_command_line("echo 'rate limit exceeded' >&2; exit 3")
            .expect_err("should fail");
        assert!(err.to_string().contains("rate limit exceeded"));
    }

    #[test]
    fn captures_trimmed_stdout() {
        let out = CommandShellAdapter
            .run_command_line("printf '  hello \\n'")
            .expect("run");
        assert_eq!(out, "hello");
    }
}
