//! Command execution for the VLAN tagging driver.
//!
//! All host mutations and queries go through a [`CommandRunner`]. The
//! production implementation, [`ShellRunner`], runs command strings through
//! `/bin/sh -c` and logs every invocation and its outcome. Arguments that
//! come from callers must be wrapped with [`shellquote`].
//!
//! # Example
//!
//! ```ignore
//! use vlan_tag_common::shell::{shellquote, CommandRunner, ShellRunner, IP_CMD};
//!
//! let runner = ShellRunner::new();
//! let cmd = format!("{} -d link show {}", IP_CMD, shellquote("eth0.100"));
//! let result = runner.run(&cmd).await?;
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{VlanTagError, VlanTagResult};

/// Default path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Shell used to interpret command strings.
const SH_CMD: &str = "/bin/sh";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\`
/// and newline.
///
/// # Example
///
/// ```
/// use vlan_tag_common::shell::shellquote;
///
/// assert_eq!(shellquote("eth0.100"), "\"eth0.100\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Quotes a string only if it contains characters outside the set that is
/// always literal to the shell.
///
/// ```
/// use vlan_tag_common::shell::shellarg;
///
/// assert_eq!(shellarg("eth0.100"), "eth0.100");
/// assert_eq!(shellarg("a b"), "\"a b\"");
/// ```
pub fn shellarg(s: &str) -> String {
    let literal = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '@' | '/' | '+' | ','));
    if literal {
        s.to_string()
    } else {
        shellquote(s)
    }
}

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The captured stdout output.
    pub stdout: String,
    /// The captured stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Builds a successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Boundary to whatever executes commands on the host.
///
/// Implementations return `Err` only when the command could not be run at
/// all; a non-zero exit is reported through [`ExecResult::exit_code`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command string and captures its status and output.
    async fn run(&self, cmd: &str) -> VlanTagResult<ExecResult>;

    /// Runs a command that mutates a device, failing on non-zero exit.
    async fn run_mutation(&self, cmd: &str) -> VlanTagResult<String> {
        let result = self.run(cmd).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(VlanTagError::DeviceMutation {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

/// Runs commands through `/bin/sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Creates a new shell runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, cmd: &str) -> VlanTagResult<ExecResult> {
        exec(cmd).await
    }
}

/// Executes a shell command asynchronously.
///
/// The command is logged at debug level; a non-zero exit is logged at warn
/// level together with its stderr.
pub async fn exec(cmd: &str) -> VlanTagResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| VlanTagError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("eth0"), "\"eth0\"");
        assert_eq!(shellquote("eth0.100"), "\"eth0.100\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellarg() {
        assert_eq!(shellarg("eth0.100"), "eth0.100");
        assert_eq!(shellarg("/usr/libexec/fabric-notify"), "/usr/libexec/fabric-notify");
        assert_eq!(shellarg("1:2"), "1:2");
        assert_eq!(shellarg("eth0;reboot"), "\"eth0;reboot\"");
        assert_eq!(shellarg(""), "\"\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        assert_eq!(ExecResult::ok("output").combined_output(), "output");
        assert_eq!(ExecResult::failed(1, "error").combined_output(), "error");

        let both = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert_eq!(both.combined_output(), "stdout\nstderr");
    }

    #[tokio::test]
    async fn test_shell_runner_echo() {
        let result = ShellRunner::new().run("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_shell_runner_exit_code() {
        let result = ShellRunner::new().run("exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_run_mutation_failure() {
        let err = ShellRunner::new()
            .run_mutation("echo 'RTNETLINK answers: File exists' >&2; exit 2")
            .await
            .unwrap_err();
        match &err {
            VlanTagError::DeviceMutation {
                exit_code, output, ..
            } => {
                assert_eq!(*exit_code, 2);
                assert_eq!(output, "RTNETLINK answers: File exists");
            }
            other => panic!("Expected DeviceMutation error, got {:?}", other),
        }
        assert!(err.is_device_exists());
    }

    #[tokio::test]
    async fn test_run_mutation_success() {
        let output = ShellRunner::new().run_mutation("echo done").await.unwrap();
        assert_eq!(output, "done");
    }
}
