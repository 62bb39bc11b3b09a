// Step
// A named unit of work: a platform predicate plus the action to run

use crate::plan::platform::{PlatformDescriptor, PlatformFamily, FAMILY_ATTRIBUTE};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Predicate over a platform's attributes.
///
/// Evaluation is pure and always terminates. An attribute the platform does
/// not carry never equals anything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Condition {
    #[default]
    Always,
    Equals {
        attribute: String,
        value: String,
    },
    NotEquals {
        attribute: String,
        value: String,
    },
    OneOf {
        attribute: String,
        values: Vec<String>,
    },
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotEquals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// `family == <family>`
    pub fn family(family: PlatformFamily) -> Self {
        Self::equals(FAMILY_ATTRIBUTE, family.as_str())
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn evaluate(&self, platform: &PlatformDescriptor) -> bool {
        match self {
            Condition::Always => true,
            Condition::Equals { attribute, value } => {
                platform.attribute(attribute) == Some(value.as_str())
            }
            Condition::NotEquals { attribute, value } => {
                platform.attribute(attribute) != Some(value.as_str())
            }
            Condition::OneOf { attribute, values } => platform
                .attribute(attribute)
                .map(|actual| values.iter().any(|v| v == actual))
                .unwrap_or(false),
            Condition::Not(inner) => !inner.evaluate(platform),
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(platform)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.evaluate(platform)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Condition], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, ")")
        }

        match self {
            Condition::Always => write!(f, "always"),
            Condition::Equals { attribute, value } => write!(f, "{} == '{}'", attribute, value),
            Condition::NotEquals { attribute, value } => {
                write!(f, "{} != '{}'", attribute, value)
            }
            Condition::OneOf { attribute, values } => {
                write!(f, "{} in [{}]", attribute, values.join(", "))
            }
            Condition::Not(inner) => write!(f, "!({})", inner),
            Condition::All(items) => join(f, items, "&&"),
            Condition::Any(items) => join(f, items, "||"),
        }
    }
}

/// Shell used to interpret a command's script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// `sh` on Unix, `cmd` on Windows
    #[default]
    Default,
    Sh,
    Bash,
    /// PowerShell Core (cross-platform)
    Pwsh,
    /// Windows PowerShell (falls back to pwsh elsewhere)
    PowerShell,
    Cmd,
}

impl FromStr for Shell {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" => Ok(Shell::Default),
            "sh" => Ok(Shell::Sh),
            "bash" => Ok(Shell::Bash),
            "pwsh" => Ok(Shell::Pwsh),
            "powershell" => Ok(Shell::PowerShell),
            "cmd" => Ok(Shell::Cmd),
            other => Err(format!(
                "Unknown shell '{}'. Valid shells: sh, bash, pwsh, powershell, cmd",
                other
            )),
        }
    }
}

/// One command line handed to the action runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub script: String,
    pub shell: Shell,
}

impl CommandSpec {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            shell: Shell::Default,
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }
}

/// Operations the orchestrator performs itself instead of spawning a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    /// The working tree is checked out before orchestration starts, so this
    /// always succeeds.
    Checkout,
    /// A reference to an externally hosted action that cannot run locally
    Unsupported(String),
}

/// What a step does when its condition holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Commands run in order; the first non-zero exit ends the action.
    /// An empty list succeeds trivially.
    Commands(Vec<CommandSpec>),
    Builtin(BuiltinAction),
}

impl Default for Action {
    fn default() -> Self {
        Action::Commands(Vec::new())
    }
}

/// A step of a job plan, shared read-only by every variant
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub name: String,
    pub condition: Condition,
    pub action: Action,
    /// Step-level environment, layered over the plan environment
    pub env: HashMap<String, String>,
    /// Overrides the scheduler's working directory (relative paths resolve against it)
    pub working_directory: Option<PathBuf>,
    /// Overrides the scheduler's default step timeout
    pub timeout: Option<Duration>,
    /// A failure is recorded but does not fail the variant
    pub continue_on_error: bool,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Append a command run with the default shell
    pub fn run(self, script: impl Into<String>) -> Self {
        self.command(CommandSpec::new(script))
    }

    /// Append a command
    pub fn command(mut self, command: CommandSpec) -> Self {
        match &mut self.action {
            Action::Commands(commands) => commands.push(command),
            Action::Builtin(_) => self.action = Action::Commands(vec![command]),
        }
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Whether this step runs on the given platform
    pub fn applies_to(&self, platform: &PlatformDescriptor) -> bool {
        self.condition.evaluate(platform)
    }
}
