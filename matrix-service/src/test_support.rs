// Test Support
// Scripted action runner for exercising executors without spawning processes

use crate::runners::{ActionOutput, ActionRequest, ActionRunner};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Script {
    exit_code: Option<i32>,
    delay: Option<Duration>,
    launch_error: Option<String>,
    timed_out: bool,
}

/// Runner whose result is looked up by (platform id, command script).
///
/// Unscripted commands succeed immediately and echo their script as output,
/// streamed line by line to the request's output callback.
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    scripts: HashMap<(String, String), Script>,
    calls: Mutex<Vec<(String, String)>>,
    envs: Mutex<Vec<HashMap<String, String>>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, platform: &str, script: &str) -> &mut Script {
        self.scripts
            .entry((platform.to_string(), script.to_string()))
            .or_default()
    }

    pub(crate) fn fail(mut self, platform: &str, script: &str, code: i32) -> Self {
        self.entry(platform, script).exit_code = Some(code);
        self
    }

    pub(crate) fn delay(mut self, platform: &str, script: &str, delay: Duration) -> Self {
        self.entry(platform, script).delay = Some(delay);
        self
    }

    pub(crate) fn launch_error(mut self, platform: &str, script: &str, message: &str) -> Self {
        self.entry(platform, script).launch_error = Some(message.to_string());
        self
    }

    pub(crate) fn time_out(mut self, platform: &str, script: &str) -> Self {
        self.entry(platform, script).timed_out = true;
        self
    }

    /// Scripts run for a platform, in call order
    pub(crate) fn calls_for(&self, platform: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == platform)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub(crate) fn last_env(&self) -> Option<HashMap<String, String>> {
        self.envs.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl ActionRunner for ScriptedRunner {
    async fn run(&self, request: ActionRequest) -> ActionOutput {
        let platform = request
            .env
            .get("MATRIX_PLATFORM_ID")
            .cloned()
            .unwrap_or_default();
        let script_text = request.command.script.clone();

        self.calls
            .lock()
            .unwrap()
            .push((platform.clone(), script_text.clone()));
        self.envs.lock().unwrap().push(request.env.clone());

        let script = self
            .scripts
            .get(&(platform, script_text.clone()))
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = script.launch_error {
            return ActionOutput::launch_failed(message);
        }
        if let Some(callback) = &request.on_output {
            for line in script_text.lines() {
                callback(line);
            }
        }
        if script.timed_out {
            return ActionOutput::timed_out(script_text);
        }
        ActionOutput::exited(script.exit_code.unwrap_or(0), script_text)
    }
}
