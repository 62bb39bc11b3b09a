use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use std::collections::{BTreeMap, HashMap};

/// The subset of a GitHub Actions-style workflow that maps onto a job plan.
///
/// Keys outside this subset are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: Option<String>,

    /// When the workflow runs
    #[serde(default, rename = "on")]
    pub on: Option<On>,

    /// Workflow-level environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub defaults: Option<Defaults>,

    /// Jobs keyed by id, in sorted order
    pub jobs: BTreeMap<String, Job>,
}

/// Trigger configuration.
///
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum On {
    Single(String),
    Multiple(Vec<String>),
    Detailed(HashMap<String, Option<EventConfig>>),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventConfig {
    /// Branch filters for push/pull_request events
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub run: Option<RunDefaults>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunDefaults {
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub name: Option<String>,

    /// Runner label, possibly `${{ matrix.<key> }}`
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOn>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub defaults: Option<Defaults>,

    #[serde(default)]
    pub strategy: Option<Strategy>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Job {
    fn run_defaults(&self) -> Option<&RunDefaults> {
        self.defaults.as_ref()?.run.as_ref()
    }

    pub fn default_shell(&self) -> Option<&str> {
        self.run_defaults()?.shell.as_deref()
    }

    pub fn default_working_directory(&self) -> Option<&str> {
        self.run_defaults()?.working_directory.as_deref()
    }
}

/// `runs-on: ubuntu-latest` or `runs-on: [self-hosted, linux]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Label(String),
    Labels(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Unset means the run's default policy applies
    #[serde(default, rename = "fail-fast")]
    pub fail_fast: Option<bool>,

    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<usize>,
}

/// One matrix combination: key/value pairs in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combination(pub Vec<(String, String)>);

impl Combination {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.0.push((key.to_string(), value.to_string())),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `strategy.matrix`: dimensions plus `include`/`exclude` entries.
///
/// Dimension order follows the YAML mapping, which determines expansion
/// order and derived platform ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Mapping")]
pub struct Matrix {
    pub dimensions: Vec<(String, Vec<String>)>,
    pub include: Vec<Combination>,
    pub exclude: Vec<Combination>,
}

impl TryFrom<Mapping> for Matrix {
    type Error = String;

    fn try_from(mapping: Mapping) -> Result<Self, Self::Error> {
        let mut matrix = Matrix::default();

        for (key, value) in mapping {
            let key = scalar(&key).ok_or("matrix keys must be strings")?;
            match key.as_str() {
                "include" => matrix.include = entries(&key, value)?,
                "exclude" => matrix.exclude = entries(&key, value)?,
                _ => {
                    let Value::Sequence(items) = value else {
                        return Err(format!("matrix dimension '{}' must be a list", key));
                    };
                    let values = items
                        .iter()
                        .map(|v| {
                            scalar(v).ok_or_else(|| {
                                format!("matrix dimension '{}' must contain scalars", key)
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    matrix.dimensions.push((key, values));
                }
            }
        }

        Ok(matrix)
    }
}

fn entries(section: &str, value: Value) -> Result<Vec<Combination>, String> {
    let Value::Sequence(items) = value else {
        return Err(format!("matrix '{}' must be a list", section));
    };
    items
        .into_iter()
        .map(|item| {
            let Value::Mapping(map) = item else {
                return Err(format!("matrix '{}' entries must be mappings", section));
            };
            let mut combination = Combination::default();
            for (k, v) in &map {
                match (scalar(k), scalar(v)) {
                    (Some(k), Some(v)) => combination.set(&k, &v),
                    _ => {
                        return Err(format!(
                            "matrix '{}' entries must map names to scalars",
                            section
                        ))
                    }
                }
            }
            Ok(combination)
        })
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A step within a job.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Action reference (e.g. `actions/checkout@v4`)
    #[serde(default)]
    pub uses: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u32>,
}

impl Step {
    /// Display name: explicit name, else derived from `uses` or `run`
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(uses) = &self.uses {
            format!("Run {}", uses)
        } else if let Some(run) = &self.run {
            let first_line = run.lines().next().unwrap_or(run).trim();
            if first_line.chars().count() > 50 {
                let short: String = first_line.chars().take(47).collect();
                format!("Run {}...", short)
            } else {
                format!("Run {}", first_line)
            }
        } else {
            "Unnamed step".to_string()
        }
    }
}
