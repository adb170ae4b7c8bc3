//! Fluent in-memory construction of state machines.

use crate::choice::ChoiceState;
use crate::error::StateMachineError;
use crate::machine::{StateMachine, DEFAULT_PACING};
use crate::map::MapState;
use crate::parallel::ParallelState;
use crate::state::{EndState, FailState, PassState, State, StateName, WaitState};
use crate::task::TaskState;
use std::collections::HashMap;
use std::time::Duration;

/// Builder for constructing [`StateMachine`] instances.
///
/// States are registered under the name they carry; registering a
/// second state with the same name replaces the first. `build` checks
/// that the start state exists and that every transition resolves, so a
/// machine that builds cannot dangle at run time.
///
/// # Examples
///
/// ```
/// use kumihimo::prelude::*;
///
/// let machine = StateMachine::builder()
///     .start_at("Greet")
///     .task(
///         TaskState::new("Greet", task_fn(|_token, ctx| async move {
///             ctx.lock().await.insert("greeting", "hello");
///             Ok(())
///         }))
///         .next("Done"),
///     )
///     .end("Done")
///     .build()?;
/// # Ok::<(), kumihimo::StateMachineError>(())
/// ```
pub struct StateMachineBuilder {
    states: HashMap<StateName, State>,
    start_at: Option<StateName>,
    pacing: Duration,
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachineBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            start_at: None,
            pacing: DEFAULT_PACING,
        }
    }

    /// Sets the start state by name.
    pub fn start_at(mut self, name: impl Into<StateName>) -> Self {
        self.start_at = Some(name.into());
        self
    }

    /// Sets the delay between top-level transitions. `Duration::ZERO`
    /// disables pacing.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Adds a task state.
    pub fn task(self, task: TaskState) -> Self {
        let name = task.name().clone();
        self.add(name, State::Task(task))
    }

    /// Adds a pass state.
    pub fn pass(self, pass: PassState) -> Self {
        let name = pass.name.clone();
        self.add(name, State::Pass(pass))
    }

    /// Adds a choice state.
    pub fn choice(self, choice: ChoiceState) -> Self {
        let name = choice.name().clone();
        self.add(name, State::Choice(choice))
    }

    /// Adds a wait state.
    pub fn wait(self, wait: WaitState) -> Self {
        let name = wait.name.clone();
        self.add(name, State::Wait(wait))
    }

    /// Adds a map state.
    pub fn map(self, map: MapState) -> Self {
        let name = map.name().clone();
        self.add(name, State::Map(map))
    }

    /// Adds a parallel state.
    pub fn parallel(self, parallel: ParallelState) -> Self {
        let name = parallel.name().clone();
        self.add(name, State::Parallel(parallel))
    }

    /// Adds a terminal fail state.
    pub fn fail(self, name: impl Into<StateName>) -> Self {
        let name = name.into();
        self.add(name.clone(), State::Fail(FailState::new(name)))
    }

    /// Adds a terminal end state.
    pub fn end(self, name: impl Into<StateName>) -> Self {
        let name = name.into();
        self.add(name.clone(), State::End(EndState::new(name)))
    }

    fn add(mut self, name: StateName, state: State) -> Self {
        self.states.insert(name, state);
        self
    }

    /// Builds the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::Configuration`] when no start state
    /// was set, the start state is not registered, or any transition
    /// references an unknown state.
    pub fn build(self) -> Result<StateMachine, StateMachineError> {
        let start_at = self.start_at.ok_or_else(|| {
            StateMachineError::Configuration("start state must be specified".to_string())
        })?;

        if !self.states.contains_key(&start_at) {
            return Err(StateMachineError::Configuration(format!(
                "start state '{start_at}' not found"
            )));
        }

        for (name, state) in &self.states {
            for target in state.transition_targets() {
                if !self.states.contains_key(target) {
                    return Err(StateMachineError::Configuration(format!(
                        "state '{name}' references unknown state '{target}'"
                    )));
                }
            }
        }

        Ok(StateMachine::new(self.states, start_at, self.pacing))
    }
}
