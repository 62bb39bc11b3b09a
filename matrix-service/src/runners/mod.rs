// Runners Module
// The action execution boundary: hands commands to an external process

pub mod shell;

pub use shell::ShellRunner;

use crate::plan::step::CommandSpec;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Callback for handling output lines in real-time
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One command invocation: (working directory, command line, environment)
#[derive(Clone)]
pub struct ActionRequest {
    pub command: CommandSpec,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    /// Kill the process once this elapses
    pub timeout: Option<Duration>,
    /// Receives each output line as it arrives
    pub on_output: Option<OutputCallback>,
}

impl fmt::Debug for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRequest")
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .field("streaming", &self.on_output.is_some())
            .finish()
    }
}

/// What came back from a command: exit status plus the combined output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    /// Exit code, `None` when the process was killed or never started
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr lines, in arrival order
    pub output: String,
    pub timed_out: bool,
    /// Set when the process could not be started at all
    pub launch_error: Option<String>,
}

impl ActionOutput {
    pub fn exited(code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self {
            launch_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn timed_out(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.launch_error.is_none()
    }
}

/// Runs a single command to completion.
///
/// Implementations block the calling variant until the process exits or the
/// request's timeout elapses; they never fail with an `Err`, launch problems
/// are reported through `ActionOutput::launch_error`.
#[async_trait::async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, request: ActionRequest) -> ActionOutput;
}
