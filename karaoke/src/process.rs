//! External tool invocation.
//!
//! Every external program (ffmpeg, ffprobe, the stem separator) is run through
//! [`run_tool`]: arguments are passed without a shell, stdout/stderr are
//! captured, and the child is killed if the timeout fires or the future is
//! dropped (caller-initiated abort).

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

/// Longest stderr excerpt carried in an error message.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Captured output of a successful tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
}

/// Why an external tool run failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program} not found — is it installed and on PATH?")]
    NotFound { program: String },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Run `program` with `args`, waiting at most `timeout`.
pub async fn run_tool(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let name = program_name(program);
    debug!(program = %program.display(), args = ?args, "running external tool");

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound {
                    program: name.clone(),
                }
            } else {
                ToolError::Io {
                    program: name.clone(),
                    source: e,
                }
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolError::Io {
            program: name.clone(),
            source: e,
        })?,
        // Dropping the wait future drops the child, which kills it.
        Err(_) => {
            return Err(ToolError::Timeout {
                program: name,
                timeout,
            })
        }
    };

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: name,
            status: output.status.to_string(),
            stderr: diagnostic_tail(&String::from_utf8_lossy(&output.stderr)),
        });
    }

    Ok(ToolOutput {
        stdout: output.stdout,
    })
}

/// Fail unless `path` exists and is non-empty. Tools sometimes exit 0 without
/// producing anything.
pub fn ensure_output(path: &Path) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("output file {} is empty", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("output file {} was not created", path.display()),
        )),
        Err(e) => Err(e),
    }
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Keep the end of stderr: ffmpeg and demucs print the actual error last.
fn diagnostic_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("…{tail}")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Write an executable shell script standing in for an external tool.
    #[cfg(unix)]
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn test_diagnostic_tail_short() {
        assert_eq!(diagnostic_tail("  boom \n"), "boom");
    }

    #[test]
    fn test_diagnostic_tail_keeps_end() {
        let long = format!("{}END", "x".repeat(5000));
        let tail = diagnostic_tail(&long);
        assert!(tail.ends_with("END"));
        assert_eq!(tail.chars().count(), MAX_DIAGNOSTIC_CHARS + 1);
    }

    #[test]
    fn test_ensure_output_missing() {
        let err = ensure_output(Path::new("/nonexistent/out.mp4")).unwrap_err();
        assert!(err.to_string().contains("was not created"));
    }

    #[test]
    fn test_ensure_output_empty() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = ensure_output(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[tokio::test]
    async fn test_run_tool_not_found() {
        let result = run_tool(
            Path::new("/nonexistent/bin/ffmpeg"),
            &[],
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_captures_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echoer", "echo \"$1\"");
        let out = run_tool(&tool, &os_args!["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "broken", "echo 'codec not supported' >&2\nexit 3");
        let err = run_tool(&tool, &[], Duration::from_secs(5)).await.unwrap_err();
        match &err {
            ToolError::Failed { program, stderr, .. } => {
                assert_eq!(program, "broken");
                assert_eq!(stderr, "codec not supported");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("codec not supported"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "sleepy", "sleep 5");
        let err = run_tool(&tool, &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
