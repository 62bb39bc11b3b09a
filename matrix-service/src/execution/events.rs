// Execution Events
// Progress reporting for matrix runs

use crate::execution::variant::{SkipReason, StepStatus, VariantStatus};
use crate::report::OverallStatus;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a matrix runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Matrix run started
    MatrixStarted {
        job_name: String,
        total_variants: usize,
        fail_fast: bool,
    },

    /// Every variant reached a terminal state
    MatrixCompleted {
        job_name: String,
        status: OverallStatus,
        duration: Duration,
    },

    /// A variant executor started running
    VariantStarted {
        platform_id: String,
        total_steps: usize,
    },

    /// A variant reached a terminal state
    VariantCompleted {
        platform_id: String,
        status: VariantStatus,
        duration: Duration,
    },

    /// A failed variant caused the remaining variants to be cancelled
    FailFastTriggered { platform_id: String },

    /// Step execution started
    StepStarted {
        platform_id: String,
        step_name: String,
        step_index: usize,
    },

    /// One line of output from a running step
    StepOutput {
        platform_id: String,
        step_name: String,
        step_index: usize,
        output: String,
    },

    /// Step execution completed
    StepCompleted {
        platform_id: String,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was not executed on this platform
    StepSkipped {
        platform_id: String,
        step_name: String,
        step_index: usize,
        reason: SkipReason,
    },
}

impl ExecutionEvent {
    pub fn matrix_started(job_name: impl Into<String>, total_variants: usize, fail_fast: bool) -> Self {
        Self::MatrixStarted {
            job_name: job_name.into(),
            total_variants,
            fail_fast,
        }
    }

    pub fn matrix_completed(
        job_name: impl Into<String>,
        status: OverallStatus,
        duration: Duration,
    ) -> Self {
        Self::MatrixCompleted {
            job_name: job_name.into(),
            status,
            duration,
        }
    }

    pub fn variant_started(platform_id: impl Into<String>, total_steps: usize) -> Self {
        Self::VariantStarted {
            platform_id: platform_id.into(),
            total_steps,
        }
    }

    pub fn variant_completed(
        platform_id: impl Into<String>,
        status: VariantStatus,
        duration: Duration,
    ) -> Self {
        Self::VariantCompleted {
            platform_id: platform_id.into(),
            status,
            duration,
        }
    }

    pub fn step_started(
        platform_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            platform_id: platform_id.into(),
            step_name: step_name.into(),
            step_index,
        }
    }

    pub fn step_output(
        platform_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
    ) -> Self {
        Self::StepOutput {
            platform_id: platform_id.into(),
            step_name: step_name.into(),
            step_index,
            output: output.into(),
        }
    }

    pub fn step_completed(
        platform_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            platform_id: platform_id.into(),
            step_name: step_name.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        platform_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        reason: SkipReason,
    ) -> Self {
        Self::StepSkipped {
            platform_id: platform_id.into(),
            step_name: step_name.into(),
            step_index,
            reason,
        }
    }

    /// Platform the event belongs to, if any
    pub fn platform_id(&self) -> Option<&str> {
        match self {
            Self::MatrixStarted { .. } | Self::MatrixCompleted { .. } => None,
            Self::VariantStarted { platform_id, .. }
            | Self::VariantCompleted { platform_id, .. }
            | Self::FailFastTriggered { platform_id }
            | Self::StepStarted { platform_id, .. }
            | Self::StepOutput { platform_id, .. }
            | Self::StepCompleted { platform_id, .. }
            | Self::StepSkipped { platform_id, .. } => Some(platform_id),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::matrix_started("unit-tests", 3, false));
        tx.send_event(ExecutionEvent::variant_started("ubuntu-latest", 2));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::MatrixStarted { total_variants: 3, .. }));

        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.platform_id(), Some("ubuntu-latest"));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::step_completed(
            "windows-latest",
            "run-tests",
            1,
            StepStatus::Failed,
            Duration::from_secs(3),
            Some(101),
        );

        if let ExecutionEvent::StepCompleted {
            platform_id,
            step_name,
            step_index,
            status,
            duration,
            exit_code,
        } = event
        {
            assert_eq!(platform_id, "windows-latest");
            assert_eq!(step_name, "run-tests");
            assert_eq!(step_index, 1);
            assert_eq!(status, StepStatus::Failed);
            assert_eq!(duration, Duration::from_secs(3));
            assert_eq!(exit_code, Some(101));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::matrix_started("test", 1, true));
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::variant_started("linux", 1));
    }
}
