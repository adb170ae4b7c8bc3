//! Document-based construction of state machines from JSON definitions.
//!
//! A definition is a JSON object with a top-level `StartAt` name and a
//! `States` mapping; each state record carries a `Type` field selecting
//! the variant and that variant's fields. Units of work are supplied by
//! name through a [`TaskRegistry`] at compile time.

use crate::choice::{ChoiceState, Condition};
use crate::error::StateMachineError;
use crate::machine::StateMachine;
use crate::map::MapState;
use crate::parallel::ParallelState;
use crate::state::{PassState, WaitState};
use crate::task::{CatchRule, RetryRule, TaskHandler, TaskState};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Named units of work available to a definition's task states.
///
/// A task state whose name has no registered handler compiles to a task
/// with no unit of work, which executes as a no-op success.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a task state name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Returns the handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Returns `true` if a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// The overall workflow definition as loaded from a JSON document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineDefinition {
    /// Name of the start state.
    pub start_at: String,
    /// State records keyed by state name.
    pub states: HashMap<String, StateDefinition>,
}

/// One state record; the `Type` field selects the variant.
#[derive(Debug, Deserialize)]
#[serde(tag = "Type")]
pub enum StateDefinition {
    /// A task state record.
    Task(TaskStateDefinition),
    /// A pass state record.
    Pass(PassStateDefinition),
    /// A choice state record.
    Choice(ChoiceStateDefinition),
    /// A wait state record.
    Wait(WaitStateDefinition),
    /// A map state record.
    Map(MapStateDefinition),
    /// A parallel state record.
    Parallel(ParallelStateDefinition),
    /// A terminal fail state record.
    Fail,
    /// A terminal end state record.
    End,
}

/// Task state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStateDefinition {
    /// State to transition to on success.
    pub next: Option<String>,
    /// Marks the task terminal; `Next` is ignored when set.
    #[serde(default)]
    pub end: bool,
    /// Ordered retry rules.
    #[serde(default)]
    pub retry: Vec<RetryDefinition>,
    /// Ordered catch rules.
    #[serde(default)]
    pub catch: Vec<CatchDefinition>,
    /// Per-attempt timeout in seconds.
    pub timeout_seconds: Option<u64>,
}

/// One retry rule record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryDefinition {
    /// Matched error names; the first entry is the rule's match name.
    pub error_equals: Vec<String>,
    /// Delay between attempts, in seconds.
    pub interval_seconds: u64,
    /// Maximum number of re-attempts.
    pub max_attempts: u32,
}

/// One catch rule record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatchDefinition {
    /// Matched error names; the first entry is the rule's match name.
    pub error_equals: Vec<String>,
    /// State to transition to when the rule matches.
    pub next: String,
}

/// Pass state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassStateDefinition {
    /// State to transition to.
    pub next: String,
}

/// Choice state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceStateDefinition {
    /// Ordered choice rules.
    #[serde(default)]
    pub choices: Vec<ChoiceRuleDefinition>,
    /// State taken when no rule matches.
    pub default: String,
}

/// One choice rule record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRuleDefinition {
    /// The rule's condition.
    pub condition: ConditionDefinition,
    /// State to transition to when the condition holds.
    pub next: String,
}

/// A condition record: an optional input path plus exactly one
/// comparison operator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConditionDefinition {
    /// `$.`-prefixed context reference; the implicit choice key is used
    /// when absent.
    pub input_path: Option<String>,
    /// Strict string equality operand.
    pub string_equals: Option<String>,
    /// Numeric equality operand.
    pub numeric_equals: Option<f64>,
    /// Strict boolean equality operand.
    pub boolean_equals: Option<bool>,
}

/// Wait state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitStateDefinition {
    /// Pause duration in seconds.
    pub seconds: u64,
    /// State to transition to.
    pub next: String,
}

/// Map state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapStateDefinition {
    /// `$.`-prefixed reference to the input array.
    pub input_path: String,
    /// `$.`-prefixed reference the result array is written to.
    pub result_path: String,
    /// State to transition to on success.
    pub next: String,
    /// The sub-workflow run once per input element.
    pub iterator: StateMachineDefinition,
}

/// Parallel state fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelStateDefinition {
    /// The sub-workflows run concurrently.
    pub branches: Vec<StateMachineDefinition>,
    /// State to transition to on success.
    pub next: String,
}

impl StateMachineDefinition {
    /// Parses a definition from a JSON document.
    pub fn from_json(doc: &str) -> Result<Self, StateMachineError> {
        serde_json::from_str(doc).map_err(|error| StateMachineError::Definition(error.to_string()))
    }

    /// Reads and parses a definition from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StateMachineError> {
        let doc = std::fs::read_to_string(path).map_err(|error| {
            StateMachineError::Definition(format!("could not read file: {error}"))
        })?;
        Self::from_json(&doc)
    }

    /// Compiles the definition into a runnable [`StateMachine`],
    /// resolving task handlers by state name from `tasks`.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::Definition`] for structural problems
    /// (an empty `ErrorEquals` list, a condition with zero or several
    /// operators) and [`StateMachineError::Configuration`] when the
    /// assembled graph fails builder validation.
    pub fn compile(self, tasks: &TaskRegistry) -> Result<StateMachine, StateMachineError> {
        let mut builder = StateMachine::builder().start_at(self.start_at);
        for (name, state) in self.states {
            builder = match state {
                StateDefinition::Task(def) => builder.task(def.into_state(&name, tasks)?),
                StateDefinition::Pass(def) => builder.pass(PassState::new(name, def.next)),
                StateDefinition::Choice(def) => builder.choice(def.into_state(&name)?),
                StateDefinition::Wait(def) => builder.wait(WaitState::new(
                    name,
                    Duration::from_secs(def.seconds),
                    def.next,
                )),
                StateDefinition::Map(def) => {
                    let input = strip_path(&def.input_path);
                    let result = strip_path(&def.result_path);
                    let iterator = def.iterator.compile(tasks)?;
                    builder.map(MapState::new(name, input, result, iterator, def.next))
                }
                StateDefinition::Parallel(def) => {
                    let branches = def
                        .branches
                        .into_iter()
                        .map(|branch| branch.compile(tasks))
                        .collect::<Result<Vec<_>, _>>()?;
                    builder.parallel(ParallelState::new(name, branches, def.next))
                }
                StateDefinition::Fail => builder.fail(name),
                StateDefinition::End => builder.end(name),
            };
        }
        builder.build()
    }
}

/// Parses a JSON file and compiles it in one step.
pub fn load_state_machine(
    path: impl AsRef<Path>,
    tasks: &TaskRegistry,
) -> Result<StateMachine, StateMachineError> {
    StateMachineDefinition::from_file(path)?.compile(tasks)
}

impl TaskStateDefinition {
    fn into_state(self, name: &str, tasks: &TaskRegistry) -> Result<TaskState, StateMachineError> {
        let mut task = match tasks.get(name) {
            Some(handler) => TaskState::new(name, handler),
            None => TaskState::unbound(name),
        };
        if !self.end {
            if let Some(next) = self.next {
                task = task.next(next);
            }
        }
        if let Some(seconds) = self.timeout_seconds {
            task = task.timeout(Duration::from_secs(seconds));
        }
        for rule in self.retry {
            let error_name = first_error_name(rule.error_equals, name, "Retry")?;
            task = task.retry(RetryRule::new(
                error_name,
                Duration::from_secs(rule.interval_seconds),
                rule.max_attempts,
            ));
        }
        for rule in self.catch {
            let error_name = first_error_name(rule.error_equals, name, "Catch")?;
            task = task.catch(CatchRule::new(error_name, rule.next));
        }
        Ok(task)
    }
}

impl ChoiceStateDefinition {
    fn into_state(self, name: &str) -> Result<ChoiceState, StateMachineError> {
        let mut choice = ChoiceState::new(name, self.default);
        for rule in self.choices {
            let condition = rule.condition.into_condition(name)?;
            choice = choice.when(condition, rule.next);
        }
        Ok(choice)
    }
}

impl ConditionDefinition {
    fn into_condition(self, state: &str) -> Result<Condition, StateMachineError> {
        let mut condition = match (self.string_equals, self.numeric_equals, self.boolean_equals) {
            (Some(expected), None, None) => Condition::string_equals(expected),
            (None, Some(expected), None) => Condition::numeric_equals(expected),
            (None, None, Some(expected)) => Condition::boolean_equals(expected),
            (None, None, None) => {
                return Err(StateMachineError::Definition(format!(
                    "choice rule in '{state}' has no comparison operator"
                )))
            }
            _ => {
                return Err(StateMachineError::Definition(format!(
                    "choice rule in '{state}' has multiple comparison operators"
                )))
            }
        };
        if let Some(path) = self.input_path {
            condition = condition.input_path(path);
        }
        Ok(condition)
    }
}

fn first_error_name(
    names: Vec<String>,
    state: &str,
    kind: &str,
) -> Result<String, StateMachineError> {
    names.into_iter().next().ok_or_else(|| {
        StateMachineError::Definition(format!("{kind} rule in '{state}' has empty ErrorEquals"))
    })
}

fn strip_path(path: &str) -> String {
    path.strip_prefix("$.").unwrap_or(path).to_string()
}
