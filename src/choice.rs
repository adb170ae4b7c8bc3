//! Choice states: conditional branching on context values.

use crate::context::{Context, SharedContext};
use crate::error::StateMachineError;
use crate::state::StateName;
use tracing::info;

/// Context key consulted by conditions that carry no input path.
pub const DEFAULT_CHOICE_KEY: &str = "choice_value";

/// The comparison a condition performs. Exactly one per condition.
///
/// Comparisons are strict: a stored value of a different type makes the
/// condition false, it is never coerced and never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Strict string equality.
    StringEquals(String),
    /// Numeric equality. Strings are not parsed as numbers.
    NumericEquals(f64),
    /// Strict boolean equality.
    BooleanEquals(bool),
}

/// A predicate over the execution context.
///
/// The value under test is resolved from an explicit input path
/// (`$.`-prefixed, the prefix is stripped) when one is set, and from
/// the fixed [`DEFAULT_CHOICE_KEY`] otherwise. An absent key makes the
/// condition false.
///
/// # Examples
///
/// ```
/// use kumihimo::Condition;
///
/// // Tests the implicit "choice_value" key
/// let cond = Condition::string_equals("go");
///
/// // Tests an explicit context path
/// let cond = Condition::numeric_equals(10.0).input_path("$.retries");
/// # let _ = cond;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    input_path: Option<String>,
    comparison: Comparison,
}

impl Condition {
    /// Creates a strict string equality condition.
    pub fn string_equals(expected: impl Into<String>) -> Self {
        Self {
            input_path: None,
            comparison: Comparison::StringEquals(expected.into()),
        }
    }

    /// Creates a numeric equality condition.
    pub fn numeric_equals(expected: f64) -> Self {
        Self {
            input_path: None,
            comparison: Comparison::NumericEquals(expected),
        }
    }

    /// Creates a strict boolean equality condition.
    pub fn boolean_equals(expected: bool) -> Self {
        Self {
            input_path: None,
            comparison: Comparison::BooleanEquals(expected),
        }
    }

    /// Resolves the tested value from `path` instead of the default key.
    pub fn input_path(mut self, path: impl Into<String>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub(crate) fn evaluate(&self, ctx: &Context) -> bool {
        let key = match self.input_path.as_deref() {
            Some(path) => path.strip_prefix("$.").unwrap_or(path),
            None => DEFAULT_CHOICE_KEY,
        };
        let Some(value) = ctx.get(key) else {
            return false;
        };
        match &self.comparison {
            Comparison::StringEquals(expected) => value.as_str() == Some(expected.as_str()),
            Comparison::NumericEquals(expected) => value.as_f64() == Some(*expected),
            Comparison::BooleanEquals(expected) => value.as_bool() == Some(*expected),
        }
    }
}

/// One branch of a choice state: a condition and its target.
#[derive(Debug, Clone)]
pub struct ChoiceRule {
    /// The predicate deciding whether this branch is taken.
    pub condition: Condition,
    /// State to transition to when the condition holds.
    pub next: StateName,
}

/// Selects exactly one transition by evaluating rules in declaration
/// order; the first satisfied rule wins, and the mandatory default is
/// taken when none match. A choice is never a dead end.
#[derive(Debug)]
pub struct ChoiceState {
    name: StateName,
    choices: Vec<ChoiceRule>,
    default: StateName,
}

impl ChoiceState {
    /// Creates a choice state with the given default transition.
    pub fn new(name: impl Into<StateName>, default: impl Into<StateName>) -> Self {
        Self {
            name: name.into(),
            choices: Vec::new(),
            default: default.into(),
        }
    }

    /// Appends a rule transitioning to `next` when `condition` holds.
    pub fn when(mut self, condition: Condition, next: impl Into<StateName>) -> Self {
        self.choices.push(ChoiceRule {
            condition,
            next: next.into(),
        });
        self
    }

    /// Returns the state's name.
    pub fn name(&self) -> &StateName {
        &self.name
    }

    pub(crate) fn targets(&self) -> Vec<&StateName> {
        self.choices
            .iter()
            .map(|rule| &rule.next)
            .chain(std::iter::once(&self.default))
            .collect()
    }

    pub(crate) async fn execute(
        &self,
        ctx: &SharedContext,
    ) -> Result<Option<StateName>, StateMachineError> {
        let guard = ctx.lock().await;
        for rule in &self.choices {
            if rule.condition.evaluate(&guard) {
                info!(
                    "choice '{}' condition met, transitioning to '{}'",
                    self.name, rule.next
                );
                return Ok(Some(rule.next.clone()));
            }
        }
        info!(
            "choice '{}' fell through to default '{}'",
            self.name, self.default
        );
        Ok(Some(self.default.clone()))
    }
}
