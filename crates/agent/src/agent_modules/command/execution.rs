use fleetwatch_common::CommandStatus;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Cap on the stdout or stderr text sent back with a result.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;
const TRUNCATION_NOTICE: &str = "\n... [output truncated]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub output: String,
}

impl ExecutionOutcome {
    fn failed(output: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            output: output.into(),
        }
    }
}

pub fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_NOTICE}", &text[..end])
}

/// Kills the script and anything it started. The script leads its own
/// process group, so the group id is its pid.
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a stale pgid yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed.");
    }
}

fn describe_exit(status: ExitStatus, stdout: &str, stderr: &str) -> ExecutionOutcome {
    if status.success() {
        let output = if stdout.trim().is_empty() {
            "Command completed successfully".to_string()
        } else {
            truncate_output(stdout)
        };
        return ExecutionOutcome {
            status: CommandStatus::Completed,
            output,
        };
    }
    if !stderr.trim().is_empty() {
        return ExecutionOutcome::failed(truncate_output(stderr));
    }
    match status.code() {
        Some(code) => ExecutionOutcome::failed(format!("Command failed with exit code {code}")),
        None => ExecutionOutcome::failed("Command was terminated by a signal"),
    }
}

/// Runs `script` through `/bin/bash` from a temporary file. If it outlives
/// `timeout` its whole process group is killed.
pub async fn execute_script(script: &str, timeout: Duration) -> ExecutionOutcome {
    if script.trim().is_empty() {
        return ExecutionOutcome::failed("Error: empty command");
    }

    let temp_file = match tempfile::Builder::new().suffix(".sh").tempfile() {
        Ok(file) => file,
        Err(e) => return ExecutionOutcome::failed(format!("Error: failed to create script file: {e}")),
    };
    if let Err(e) = fs::write(temp_file.path(), script.as_bytes()).await {
        return ExecutionOutcome::failed(format!("Error: failed to write script file: {e}"));
    }
    // Closes our handle; the file is removed when `temp_path` drops.
    let temp_path = temp_file.into_temp_path();

    let mut command = TokioCommand::new("/bin/bash");
    command
        .arg(&*temp_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return ExecutionOutcome::failed(format!("Error: {e}")),
    };
    let pid = child.id();
    info!(pid = ?pid, "Spawned command process.");

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let outcome = describe_exit(output.status, &stdout, &stderr);
            info!(status = %outcome.status, exit = ?output.status.code(), "Command finished.");
            outcome
        }
        Ok(Err(e)) => ExecutionOutcome::failed(format!("Error: {e}")),
        Err(_) => {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            warn!(timeout_secs = timeout.as_secs(), "Command timed out; process group killed.");
            ExecutionOutcome::failed(format!("Command timeout ({}s)", timeout.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const LIMIT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn success_returns_stdout() {
        let outcome = execute_script("echo hello", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Completed);
        assert_eq!(outcome.output, "hello\n");
    }

    #[tokio::test]
    async fn silent_success_gets_placeholder() {
        let outcome = execute_script("true", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Completed);
        assert_eq!(outcome.output, "Command completed successfully");
    }

    #[tokio::test]
    async fn failure_prefers_stderr() {
        let outcome = execute_script("echo boom >&2; exit 1", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert_eq!(outcome.output, "boom\n");

        let outcome = execute_script("exit 3", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert_eq!(outcome.output, "Command failed with exit code 3");
    }

    #[tokio::test]
    async fn multi_line_scripts_run_as_one_unit() {
        let outcome = execute_script("x=4\nif [ \"$x\" -gt 3 ]; then\n  echo big\nfi", LIMIT).await;
        assert_eq!(outcome.output, "big\n");
    }

    #[tokio::test]
    async fn timeout_kills_and_fails() {
        let started = Instant::now();
        let outcome = execute_script("sleep 20", Duration::from_secs(1)).await;
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert_eq!(outcome.output, "Command timeout (1s)");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    fn is_gone_or_zombie(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn timeout_kills_background_children_too() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let script = format!("sleep 30 &\necho $! > {}\nwait", pid_file.display());

        let outcome = execute_script(&script, Duration::from_secs(1)).await;
        assert_eq!(outcome.output, "Command timeout (1s)");

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!pid.is_empty());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !is_gone_or_zombie(&pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(is_gone_or_zombie(&pid), "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn large_output_is_capped() {
        let outcome = execute_script("head -c 200000 /dev/zero | tr '\\0' 'a'", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Completed);
        assert!(outcome.output.len() <= MAX_OUTPUT_BYTES + TRUNCATION_NOTICE.len());
        assert!(outcome.output.ends_with("[output truncated]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(MAX_OUTPUT_BYTES);
        let cut = truncate_output(&text);
        assert!(cut.ends_with(TRUNCATION_NOTICE));
        assert!(cut.len() <= MAX_OUTPUT_BYTES + TRUNCATION_NOTICE.len());
        assert_eq!(truncate_output("short"), "short");
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let outcome = execute_script("   ", LIMIT).await;
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert!(outcome.output.starts_with("Error:"));
    }
}
