// Job Plan
// Ordered steps fanned out over a validated matrix of platforms

use crate::plan::platform::PlatformDescriptor;
use crate::plan::step::Step;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Structural defects found while building a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
}

/// Event that can start a job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    PullRequest,
    Push,
    Manual,
    Other(String),
}

impl FromStr for TriggerEvent {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pull_request" | "pull-request" | "pr" => TriggerEvent::PullRequest,
            "push" => TriggerEvent::Push,
            "workflow_dispatch" | "manual" => TriggerEvent::Manual,
            other => TriggerEvent::Other(other.to_string()),
        })
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::PullRequest => write!(f, "pull_request"),
            TriggerEvent::Push => write!(f, "push"),
            TriggerEvent::Manual => write!(f, "workflow_dispatch"),
            TriggerEvent::Other(name) => write!(f, "{}", name),
        }
    }
}

/// When a plan should run: the events it reacts to and their target branches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    /// Per-event branch filters; an empty list accepts every branch
    pub events: HashMap<TriggerEvent, Vec<String>>,
}

impl Trigger {
    pub fn on(mut self, event: TriggerEvent, branches: Vec<String>) -> Self {
        self.events.insert(event, branches);
        self
    }

    /// A trigger with no events accepts everything (the plan was invoked directly).
    pub fn matches(&self, event: &TriggerEvent, branch: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        match self.events.get(event) {
            Some(branches) if branches.is_empty() => true,
            Some(branches) => branches.iter().any(|p| branch_matches(p, branch)),
            None => false,
        }
    }

    /// Whether any declared event accepts `branch`
    pub fn matches_branch(&self, branch: &str) -> bool {
        self.events.is_empty()
            || self
                .events
                .keys()
                .any(|event| self.matches(event, branch))
    }
}

/// Match a branch against a filter pattern.
///
/// `*` matches within one path segment, `**` matches across segments.
fn branch_matches(pattern: &str, branch: &str) -> bool {
    fn matches(p: &[u8], b: &[u8]) -> bool {
        match p.first() {
            None => b.is_empty(),
            Some(b'*') if p.get(1) == Some(&b'*') => {
                let rest = &p[2..];
                (0..=b.len()).any(|i| matches(rest, &b[i..]))
            }
            Some(b'*') => {
                let rest = &p[1..];
                for i in 0..=b.len() {
                    if matches(rest, &b[i..]) {
                        return true;
                    }
                    if i < b.len() && b[i] == b'/' {
                        break;
                    }
                }
                false
            }
            Some(c) => b.first() == Some(c) && matches(&p[1..], &b[1..]),
        }
    }
    matches(pattern.as_bytes(), branch.as_bytes())
}

/// A validated job plan.
///
/// Once built the plan is read-only; changing it means building a new one.
#[derive(Debug, Clone)]
pub struct JobPlan {
    name: String,
    steps: Arc<[Step]>,
    matrix: Vec<Arc<PlatformDescriptor>>,
    trigger: Trigger,
    env: HashMap<String, String>,
    fail_fast: bool,
    max_parallel: Option<usize>,
}

impl JobPlan {
    pub fn builder(name: impl Into<String>) -> JobPlanBuilder {
        JobPlanBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn shared_steps(&self) -> Arc<[Step]> {
        Arc::clone(&self.steps)
    }

    pub fn platforms(&self) -> &[Arc<PlatformDescriptor>] {
        &self.matrix
    }

    pub fn platform(&self, id: &str) -> Option<&Arc<PlatformDescriptor>> {
        self.matrix.iter().find(|p| p.id == id)
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Fail-fast policy declared with the plan
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.max_parallel
    }

    /// Build a new plan restricted to the given platform ids, in matrix order.
    pub fn restrict_to(&self, ids: &[String]) -> Result<JobPlan, PlanError> {
        if let Some(unknown) = ids.iter().find(|id| self.platform(id).is_none()) {
            return Err(PlanError::InvalidPlan(format!(
                "platform '{}' is not part of the matrix",
                unknown
            )));
        }
        let matrix: Vec<_> = self
            .matrix
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect();
        if matrix.is_empty() {
            return Err(PlanError::InvalidPlan("matrix is empty".to_string()));
        }
        Ok(JobPlan {
            matrix,
            ..self.clone()
        })
    }
}

/// Builder that validates eagerly in `build`
#[derive(Debug, Clone)]
pub struct JobPlanBuilder {
    name: String,
    steps: Vec<Step>,
    matrix: Vec<PlatformDescriptor>,
    trigger: Trigger,
    env: HashMap<String, String>,
    fail_fast: bool,
    max_parallel: Option<usize>,
}

impl JobPlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            matrix: Vec::new(),
            trigger: Trigger::default(),
            env: HashMap::new(),
            fail_fast: false,
            max_parallel: None,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn platform(mut self, platform: PlatformDescriptor) -> Self {
        self.matrix.push(platform);
        self
    }

    pub fn platforms(mut self, platforms: impl IntoIterator<Item = PlatformDescriptor>) -> Self {
        self.matrix.extend(platforms);
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn build(self) -> Result<JobPlan, PlanError> {
        if self.matrix.is_empty() {
            return Err(PlanError::InvalidPlan("matrix is empty".to_string()));
        }

        let mut ids = HashSet::new();
        for platform in &self.matrix {
            if platform.id.trim().is_empty() {
                return Err(PlanError::InvalidPlan(
                    "platform id must not be empty".to_string(),
                ));
            }
            if !ids.insert(platform.id.as_str()) {
                return Err(PlanError::InvalidPlan(format!(
                    "duplicate platform id '{}'",
                    platform.id
                )));
            }
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(PlanError::InvalidPlan(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        if self.max_parallel == Some(0) {
            return Err(PlanError::InvalidPlan(
                "max-parallel must be at least 1".to_string(),
            ));
        }

        Ok(JobPlan {
            name: self.name,
            steps: self.steps.into(),
            matrix: self.matrix.into_iter().map(Arc::new).collect(),
            trigger: self.trigger,
            env: self.env,
            fail_fast: self.fail_fast,
            max_parallel: self.max_parallel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::platform::PlatformFamily;
    use crate::plan::step::Condition;

    fn three_platforms() -> Vec<PlatformDescriptor> {
        vec![
            PlatformDescriptor::for_runner("ubuntu-latest"),
            PlatformDescriptor::for_runner("macos-latest"),
            PlatformDescriptor::for_runner("windows-latest"),
        ]
    }

    #[test]
    fn test_build_valid_plan() {
        let plan = JobPlan::builder("unit-tests")
            .platforms(three_platforms())
            .step(
                Step::new("install-deps")
                    .with_condition(Condition::family(PlatformFamily::Linux))
                    .run("apt-get install -y libfoo-dev"),
            )
            .step(Step::new("run-tests").run("cargo test"))
            .build()
            .unwrap();

        assert_eq!(plan.name(), "unit-tests");
        assert_eq!(plan.platforms().len(), 3);
        assert_eq!(plan.steps()[0].name, "install-deps");
        assert_eq!(plan.steps()[1].name, "run-tests");
        assert!(!plan.fail_fast());
        assert!(plan.platform("macos-latest").is_some());
    }

    #[test]
    fn test_empty_matrix_is_invalid() {
        let err = JobPlan::builder("empty")
            .step(Step::new("run-tests").run("cargo test"))
            .build()
            .unwrap_err();

        assert_eq!(err, PlanError::InvalidPlan("matrix is empty".to_string()));
    }

    #[test]
    fn test_duplicate_platform_is_invalid() {
        let err = JobPlan::builder("dup")
            .platform(PlatformDescriptor::new("linux"))
            .platform(PlatformDescriptor::new("linux"))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("duplicate platform id 'linux'"));
    }

    #[test]
    fn test_duplicate_step_is_invalid() {
        let err = JobPlan::builder("dup")
            .platform(PlatformDescriptor::new("linux"))
            .step(Step::new("test"))
            .step(Step::new("test"))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn test_zero_max_parallel_is_invalid() {
        let result = JobPlan::builder("zero")
            .platform(PlatformDescriptor::new("linux"))
            .max_parallel(Some(0))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_restrict_to() {
        let plan = JobPlan::builder("unit-tests")
            .platforms(three_platforms())
            .build()
            .unwrap();

        let restricted = plan
            .restrict_to(&["windows-latest".to_string(), "ubuntu-latest".to_string()])
            .unwrap();
        let ids: Vec<_> = restricted.platforms().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ubuntu-latest", "windows-latest"]);

        assert!(plan.restrict_to(&["freebsd".to_string()]).is_err());
    }

    #[test]
    fn test_trigger_matches_branches() {
        let trigger = Trigger::default().on(
            TriggerEvent::PullRequest,
            vec!["develop".to_string(), "release/*".to_string()],
        );

        assert!(trigger.matches(&TriggerEvent::PullRequest, "develop"));
        assert!(trigger.matches(&TriggerEvent::PullRequest, "release/1.2"));
        assert!(!trigger.matches(&TriggerEvent::PullRequest, "release/1.2/hotfix"));
        assert!(!trigger.matches(&TriggerEvent::PullRequest, "main"));
        assert!(!trigger.matches(&TriggerEvent::Push, "develop"));
    }

    #[test]
    fn test_trigger_double_star_and_empty() {
        let trigger = Trigger::default()
            .on(TriggerEvent::Push, vec!["feature/**".to_string()])
            .on(TriggerEvent::PullRequest, Vec::new());

        assert!(trigger.matches(&TriggerEvent::Push, "feature/a/b"));
        assert!(trigger.matches(&TriggerEvent::PullRequest, "anything"));
        assert!(Trigger::default().matches(&TriggerEvent::Push, "main"));
    }

    #[test]
    fn test_trigger_matches_branch_for_any_event() {
        let trigger = Trigger::default()
            .on(TriggerEvent::PullRequest, vec!["develop".to_string()])
            .on(TriggerEvent::Push, vec!["main".to_string()]);

        assert!(trigger.matches_branch("develop"));
        assert!(trigger.matches_branch("main"));
        assert!(!trigger.matches_branch("feature/x"));
        assert!(Trigger::default().matches_branch("anything"));
    }

    #[test]
    fn test_trigger_event_from_str() {
        assert_eq!(
            "pull_request".parse::<TriggerEvent>().unwrap(),
            TriggerEvent::PullRequest
        );
        assert_eq!(
            "schedule".parse::<TriggerEvent>().unwrap(),
            TriggerEvent::Other("schedule".to_string())
        );
    }
}
