// Shell Runner
// Executes step commands through sh, bash, cmd, pwsh or powershell

use crate::plan::step::Shell;
use crate::runners::{ActionOutput, ActionRequest, ActionRunner};

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// How long to keep draining pipes once the shell itself has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Lower bound on the drain so output written just before exit is not lost
const MIN_DRAIN: Duration = Duration::from_millis(100);

impl Shell {
    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Sh => ("sh", &["-c"]),
            Shell::Bash => ("bash", &["-c"]),
            Shell::Cmd => ("cmd", &["/C"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::PowerShell => {
                if cfg!(target_os = "windows") {
                    ("powershell.exe", &["-NoLogo", "-NoProfile", "-Command"])
                } else {
                    // Fall back to pwsh on non-Windows
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                }
            }
        }
    }
}

/// Action runner backed by local shell processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ActionRunner for ShellRunner {
    async fn run(&self, request: ActionRequest) -> ActionOutput {
        let (shell_cmd, shell_args) = request.command.shell.get_command();

        let program = match which::which(shell_cmd) {
            Ok(path) => path,
            Err(e) => {
                return ActionOutput::launch_failed(format!(
                    "Shell '{}' not found: {}",
                    shell_cmd, e
                ));
            }
        };

        let mut cmd = Command::new(program);
        cmd.args(shell_args);
        cmd.arg(&request.command.script);
        cmd.current_dir(&request.working_dir);
        cmd.envs(&request.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ActionOutput::launch_failed(format!(
                    "Failed to spawn shell process '{}' in {}: {}",
                    shell_cmd,
                    request.working_dir.display(),
                    e
                ));
            }
        };

        // Both pipes feed one channel so the captured output keeps arrival order
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, line_tx.clone())));
        }
        drop(line_tx);

        let on_output = request.on_output.clone();
        let collector = tokio::spawn(async move {
            let mut output = String::new();
            while let Some(line) = line_rx.recv().await {
                if let Some(callback) = &on_output {
                    callback(&line);
                }
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&line);
            }
            output
        });

        // Wait for completion with optional timeout
        let wait_result = match request.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => Some(result),
                Err(_) => {
                    let _ = child.kill().await;
                    None
                }
            },
            None => Some(child.wait().await),
        };

        // Background processes may inherit the pipes and keep them open
        // after the shell exits, so the drain is always bounded
        let drain = match wait_result {
            Some(_) => drain_budget(request.timeout, started.elapsed()),
            None => Duration::ZERO,
        };
        let _ = tokio::time::timeout(drain, async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        })
        .await;
        for reader in &readers {
            reader.abort();
        }

        let output = tokio::time::timeout(DRAIN_GRACE, collector)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        match wait_result {
            Some(Ok(status)) => ActionOutput {
                exit_code: status.code(),
                output,
                timed_out: false,
                launch_error: None,
            },
            Some(Err(e)) => ActionOutput {
                exit_code: None,
                output,
                timed_out: false,
                launch_error: Some(format!("Failed to wait for '{}': {}", shell_cmd, e)),
            },
            None => {
                let mut timed_out = ActionOutput::timed_out(output);
                if let Some(timeout) = request.timeout {
                    if !timed_out.output.is_empty() {
                        timed_out.output.push('\n');
                    }
                    timed_out
                        .output
                        .push_str(&format!("Process timed out after {:?}", timeout));
                }
                timed_out
            }
        }
    }
}

/// Time left for draining pipes after the shell exited
fn drain_budget(timeout: Option<Duration>, elapsed: Duration) -> Duration {
    match timeout {
        Some(timeout) => timeout
            .saturating_sub(elapsed)
            .clamp(MIN_DRAIN, DRAIN_GRACE),
        None => DRAIN_GRACE,
    }
}

/// Forward raw lines; output is opaque, so invalid UTF-8 is replaced, never fatal
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::plan::step::CommandSpec;
    use crate::runners::OutputCallback;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn request(script: &str) -> ActionRequest {
        ActionRequest {
            command: CommandSpec::new(script),
            working_dir: std::env::current_dir().unwrap(),
            env: HashMap::new(),
            timeout: None,
            on_output: None,
        }
    }

    #[tokio::test]
    async fn test_shell_runner_echo() {
        let output = ShellRunner::new().run(request("echo hello")).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert_eq!(output.output, "hello");
    }

    #[tokio::test]
    async fn test_shell_runner_exit_code() {
        let output = ShellRunner::new().run(request("exit 42")).await;

        assert_eq!(output.exit_code, Some(42));
        assert!(!output.success());
        assert!(output.launch_error.is_none());
    }

    #[tokio::test]
    async fn test_shell_runner_combines_stderr() {
        let output = ShellRunner::new()
            .run(request("echo out; echo err >&2"))
            .await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.output.contains("out"));
        assert!(output.output.contains("err"));
    }

    #[tokio::test]
    async fn test_shell_runner_with_env() {
        let mut req = request("echo $MY_VAR");
        req.env.insert("MY_VAR".to_string(), "test_value".to_string());

        let output = ShellRunner::new().run(req).await;

        assert!(output.output.contains("test_value"));
    }

    #[tokio::test]
    async fn test_shell_runner_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();

        let mut req = request("ls");
        req.working_dir = temp.path().to_path_buf();

        let output = ShellRunner::new().run(req).await;

        assert!(output.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_shell_runner_missing_working_dir() {
        let mut req = request("echo never");
        req.working_dir = "/definitely/not/a/real/dir".into();

        let output = ShellRunner::new().run(req).await;

        assert!(output.launch_error.is_some());
        assert_eq!(output.exit_code, None);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_shell_runner_timeout() {
        let mut req = request("echo started; sleep 10");
        req.timeout = Some(Duration::from_millis(300));

        let start = Instant::now();
        let output = ShellRunner::new().run(req).await;

        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(!output.success());
        assert!(output.output.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_shell_runner_keeps_output_after_invalid_utf8() {
        let script = "printf 'a\\377b\\n'; i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done; echo last; exit 0";
        let output = ShellRunner::new().run(request(script)).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert_eq!(output.output.lines().next(), Some("a\u{FFFD}b"));
        assert!(output.output.contains("line1999"));
        assert_eq!(output.output.lines().last(), Some("last"));
    }

    #[tokio::test]
    async fn test_shell_runner_background_process_does_not_hold_step() {
        let mut req = request("sleep 5 & echo hi");
        req.timeout = Some(Duration::from_millis(300));

        let start = Instant::now();
        let output = ShellRunner::new().run(req).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(!output.timed_out);
        assert!(output.output.contains("hi"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shell_runner_background_process_without_timeout() {
        let start = Instant::now();
        let output = ShellRunner::new().run(request("sleep 8 & echo hi")).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.output.contains("hi"));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_shell_runner_streams_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut req = request("echo one; echo two >&2; echo three");
        let callback: OutputCallback = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        req.on_output = Some(callback);

        let output = ShellRunner::new().run(req).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&"two".to_string()));
        assert_eq!(output.output.lines().count(), 3);
    }

    #[test]
    fn test_drain_budget() {
        assert_eq!(drain_budget(None, Duration::from_secs(60)), DRAIN_GRACE);
        assert_eq!(
            drain_budget(Some(Duration::from_millis(500)), Duration::from_millis(200)),
            Duration::from_millis(300)
        );
        assert_eq!(
            drain_budget(Some(Duration::from_secs(1)), Duration::from_secs(2)),
            MIN_DRAIN
        );
        assert_eq!(
            drain_budget(Some(Duration::from_secs(600)), Duration::ZERO),
            DRAIN_GRACE
        );
    }
}
