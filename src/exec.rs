use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

/// Result of a completed external process invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Uniform capability to run an external program. Generalizes the
/// teacher's `spawn_ffmpeg` (a single hardcoded `Command` invocation) into
/// a reusable runner driven by `$name`-style argument templates.
pub struct Exec;

impl Exec {
    /// Split a template string on whitespace and substitute `$name`
    /// tokens against `vars`. Purely textual — no shell is invoked.
    pub fn build_args(template: &str, vars: &HashMap<&str, String>) -> Vec<String> {
        template
            .split_whitespace()
            .map(|token| {
                if let Some(name) = token.strip_prefix('$') {
                    vars.get(name).cloned().unwrap_or_default()
                } else {
                    token.to_string()
                }
            })
            .collect()
    }

    /// Run `bin` with `args` to completion. Fails on non-zero exit.
    pub fn run(bin: &str, args: &[String]) -> Result<ExecOutput> {
        let output = Command::new(bin)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn {bin}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            bail!("{bin} exited with status {exit_code}: {stderr}");
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Same as `run`, but never fails — used where the pipeline itself
    /// decides whether a non-zero exit matters (e.g. best-effort fallback
    /// attempts).
    pub fn run_safe(bin: &str, args: &[String]) -> ExecOutput {
        match Command::new(bin).args(args).output() {
            Ok(output) => ExecOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Err(e) => ExecOutput {
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: -1,
            },
        }
    }

    /// Run a long-lived process, delivering stderr line-by-line to
    /// `on_line` as it is produced (used by the video pipeline to parse
    /// `Duration:`/`time=` progress out of ffmpeg-shaped stderr).
    pub fn run_stream(
        bin: &str,
        args: &[String],
        mut on_line: impl FnMut(&str),
    ) -> Result<i32> {
        let mut child = Command::new(bin)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {bin}"))?;

        let stderr = child
            .stderr
            .take()
            .context("child process had no stderr pipe")?;
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            let line = line.unwrap_or_default();
            on_line(&line);
        }

        let status = child.wait().context("failed to wait on child process")?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_substitutes_known_vars_and_leaves_literals() {
        let mut vars = HashMap::new();
        vars.insert("input", "/tmp/in.mp4".to_string());
        vars.insert("output", "/tmp/out.mp4".to_string());
        let args = Exec::build_args("-i $input -c:v libx264 $output", &vars);
        assert_eq!(
            args,
            vec!["-i", "/tmp/in.mp4", "-c:v", "libx264", "/tmp/out.mp4"]
        );
    }

    #[test]
    fn build_args_substitutes_missing_var_as_empty() {
        let vars = HashMap::new();
        let args = Exec::build_args("-t $missing", &vars);
        assert_eq!(args, vec!["-t", ""]);
    }

    #[test]
    fn run_fails_on_nonzero_exit() {
        let result = Exec::run("false", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn run_succeeds_and_captures_stdout() {
        let out = Exec::run("echo", &["hello".to_string()]).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
    }
}
