//! State variants and the dispatch over them.

use crate::choice::ChoiceState;
use crate::context::{Context, SharedContext};
use crate::error::StateMachineError;
use crate::map::MapState;
use crate::parallel::ParallelState;
use crate::task::TaskState;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Type-safe state name wrapper.
///
/// Provides compile-time safety for state identifiers, preventing
/// typos and mismatched state names at the API level.
///
/// # Examples
///
/// ```
/// use kumihimo::StateName;
///
/// let name = StateName::new("ProcessOrder");
/// assert_eq!(name.as_str(), "ProcessOrder");
///
/// // From trait for ergonomic conversion
/// let name: StateName = "ValidateInput".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateName(String);

impl StateName {
    /// Creates a new StateName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the state name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StateName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One node of a state machine graph.
///
/// The variant set is closed: every state a machine can hold is one of
/// these eight kinds. A state never references the graph it belongs to;
/// execution yields the *name* of the next state (or `None` to stop)
/// and the run loop resolves it, so states stay reusable across graphs.
pub enum State {
    /// Runs a unit of work with retry, catch, and timeout handling.
    Task(TaskState),
    /// Applies an optional context transformation, then continues.
    Pass(PassState),
    /// Selects one of several transitions by inspecting the context.
    Choice(ChoiceState),
    /// Suspends the run for a fixed duration.
    Wait(WaitState),
    /// Fans out over an array, one sub-workflow run per element.
    Map(MapState),
    /// Runs a fixed list of sub-workflow branches concurrently.
    Parallel(ParallelState),
    /// Terminal state that always fails.
    Fail(FailState),
    /// Terminal state that always succeeds.
    End(EndState),
}

impl State {
    /// Returns the state's name.
    pub fn name(&self) -> &StateName {
        match self {
            State::Task(state) => state.name(),
            State::Pass(state) => &state.name,
            State::Choice(state) => state.name(),
            State::Wait(state) => &state.name,
            State::Map(state) => state.name(),
            State::Parallel(state) => state.name(),
            State::Fail(state) => &state.name,
            State::End(state) => &state.name,
        }
    }

    pub(crate) async fn execute(
        &self,
        token: &CancellationToken,
        ctx: &SharedContext,
    ) -> Result<Option<StateName>, StateMachineError> {
        match self {
            State::Task(state) => state.execute(token, ctx).await,
            State::Pass(state) => state.execute(ctx).await,
            State::Choice(state) => state.execute(ctx).await,
            State::Wait(state) => state.execute(token).await,
            State::Map(state) => state.execute(token, ctx).await,
            State::Parallel(state) => state.execute(token, ctx).await,
            State::Fail(state) => state.execute(),
            State::End(state) => state.execute(),
        }
    }

    /// Every state name this state can transition to.
    ///
    /// Used by the builder to validate that no transition dangles.
    pub(crate) fn transition_targets(&self) -> Vec<&StateName> {
        match self {
            State::Task(state) => state.targets(),
            State::Pass(state) => vec![&state.next],
            State::Choice(state) => state.targets(),
            State::Wait(state) => vec![&state.next],
            State::Map(state) => vec![state.next()],
            State::Parallel(state) => vec![state.next()],
            State::Fail(_) | State::End(_) => Vec::new(),
        }
    }
}

/// Passes the run through, optionally reshaping the context.
///
/// The modifier is a synchronous, side-effect-free function of the
/// context, useful for massaging data between stages.
pub struct PassState {
    pub(crate) name: StateName,
    pub(crate) next: StateName,
    modifier: Option<Arc<dyn Fn(&mut Context) + Send + Sync>>,
}

impl PassState {
    /// Creates a pass state transitioning to `next`.
    pub fn new(name: impl Into<StateName>, next: impl Into<StateName>) -> Self {
        Self {
            name: name.into(),
            next: next.into(),
            modifier: None,
        }
    }

    /// Sets a context transformation applied when the state executes.
    pub fn with_modifier(mut self, modifier: impl Fn(&mut Context) + Send + Sync + 'static) -> Self {
        self.modifier = Some(Arc::new(modifier));
        self
    }

    pub(crate) async fn execute(
        &self,
        ctx: &SharedContext,
    ) -> Result<Option<StateName>, StateMachineError> {
        debug!("executing pass state '{}'", self.name);
        if let Some(modifier) = &self.modifier {
            let mut guard = ctx.lock().await;
            modifier(&mut guard);
        }
        Ok(Some(self.next.clone()))
    }
}

impl fmt::Debug for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassState")
            .field("name", &self.name)
            .field("next", &self.next)
            .field("modifier", &self.modifier.is_some())
            .finish()
    }
}

/// Suspends the run for a fixed duration, then continues.
#[derive(Debug)]
pub struct WaitState {
    pub(crate) name: StateName,
    duration: Duration,
    pub(crate) next: StateName,
}

impl WaitState {
    /// Creates a wait state pausing for `duration` before `next`.
    pub fn new(
        name: impl Into<StateName>,
        duration: Duration,
        next: impl Into<StateName>,
    ) -> Self {
        Self {
            name: name.into(),
            duration,
            next: next.into(),
        }
    }

    pub(crate) async fn execute(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<StateName>, StateMachineError> {
        info!("wait state '{}' pausing for {:?}", self.name, self.duration);
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(Some(self.next.clone())),
            _ = token.cancelled() => Err(StateMachineError::Cancelled),
        }
    }
}

/// Terminal state yielding a failure that identifies it by name.
///
/// Typically the target of a catch rule.
#[derive(Debug)]
pub struct FailState {
    pub(crate) name: StateName,
}

impl FailState {
    /// Creates a fail state.
    pub fn new(name: impl Into<StateName>) -> Self {
        Self { name: name.into() }
    }

    pub(crate) fn execute(&self) -> Result<Option<StateName>, StateMachineError> {
        warn!("state machine failed in state '{}'", self.name);
        Err(StateMachineError::ExplicitFail(self.name.clone()))
    }
}

/// Terminal state yielding a clean successful stop.
#[derive(Debug)]
pub struct EndState {
    pub(crate) name: StateName,
}

impl EndState {
    /// Creates an end state.
    pub fn new(name: impl Into<StateName>) -> Self {
        Self { name: name.into() }
    }

    pub(crate) fn execute(&self) -> Result<Option<StateName>, StateMachineError> {
        debug!("reached end state '{}'", self.name);
        Ok(None)
    }
}
