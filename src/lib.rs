//! # Kumihimo (組紐)
//!
//! A lightweight state machine workflow engine for Rust.
//!
//! The name "Kumihimo" (組紐) means "braided cord" in Japanese,
//! representing how this engine braids independent units of work,
//! branches, and failure handling into one robust workflow.
//!
//! ## Features
//!
//! - **Declarative graphs**: named states connected by explicit
//!   transitions, built fluently or loaded from JSON definitions
//! - **Async first**: built on `tokio`; units of work run as their own
//!   tasks with cooperative cancellation
//! - **Failure protocol**: per-attempt timeouts, named-error retry
//!   rules, and named-error catch transitions
//! - **Structured fan-out**: Map states iterate a sub-workflow over an
//!   array, Parallel states run fixed branch lists, both joining with
//!   index-ordered results
//! - **Type-safe**: [`StateName`] newtype and JSON-typed context
//!   accessors that never coerce silently
//!
//! ## Quick Start
//!
//! ```rust
//! use kumihimo::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), StateMachineError> {
//! let machine = StateMachine::builder()
//!     .start_at("Greet")
//!     .pacing(Duration::ZERO)
//!     .task(
//!         TaskState::new("Greet", task_fn(|_token, ctx| async move {
//!             ctx.lock().await.insert("greeting", "hello");
//!             Ok(())
//!         }))
//!         .next("Done"),
//!     )
//!     .end("Done")
//!     .build()?;
//!
//! let output = machine.run(CancellationToken::new(), Context::new()).await?;
//! assert_eq!(output.get_str("greeting"), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry and Catch
//!
//! Retry rules re-attempt a task on a matching named error; catch rules
//! redirect execution once retries are exhausted:
//!
//! ```rust
//! use kumihimo::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), StateMachineError> {
//! let machine = StateMachine::builder()
//!     .start_at("CallApi")
//!     .pacing(Duration::ZERO)
//!     .task(
//!         TaskState::new("CallApi", task_fn(|_token, _ctx| async {
//!             Err(TaskError::named("API_BAD_GATEWAY", "api service is unavailable"))
//!         }))
//!         .next("Done")
//!         .retry(RetryRule::new("API_BAD_GATEWAY", Duration::from_millis(1), 2))
//!         .catch(CatchRule::new("API_BAD_GATEWAY", "Fallback")),
//!     )
//!     .task(
//!         TaskState::new("Fallback", task_fn(|_token, ctx| async move {
//!             ctx.lock().await.insert("fallback", true);
//!             Ok(())
//!         }))
//!         .next("Done"),
//!     )
//!     .end("Done")
//!     .build()?;
//!
//! let output = machine.run(CancellationToken::new(), Context::new()).await?;
//! assert_eq!(output.get_bool("fallback"), Some(true));
//! # Ok(())
//! # }
//! ```
//!
//! ## Document Definitions
//!
//! The same graphs load from JSON, with units of work supplied by name:
//!
//! ```rust
//! use kumihimo::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), StateMachineError> {
//! let doc = r#"{
//!     "StartAt": "Seed",
//!     "States": {
//!         "Seed": { "Type": "Task", "Next": "Done" },
//!         "Done": { "Type": "End" }
//!     }
//! }"#;
//!
//! let mut tasks = TaskRegistry::new();
//! tasks.register("Seed", task_fn(|_token, ctx| async move {
//!     ctx.lock().await.insert("seeded", true);
//!     Ok(())
//! }));
//!
//! let machine = StateMachineDefinition::from_json(doc)?.compile(&tasks)?;
//! let output = machine.run(CancellationToken::new(), Context::new()).await?;
//! assert_eq!(output.get_bool("seeded"), Some(true));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! A run returns either the final context or a single error identifying
//! the failing state and the underlying cause chain:
//!
//! ```rust
//! use kumihimo::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let machine = StateMachine::builder()
//!     .start_at("Abort")
//!     .pacing(Duration::ZERO)
//!     .fail("Abort")
//!     .build()
//!     .unwrap();
//!
//! match machine.run(CancellationToken::new(), Context::new()).await {
//!     Ok(_) => unreachable!(),
//!     Err(error) => {
//!         assert_eq!(
//!             error.to_string(),
//!             "state 'Abort' failed: failure in state 'Abort'"
//!         );
//!     }
//! }
//! # }
//! ```

mod builder;
mod choice;
mod context;
mod definition;
mod error;
mod machine;
mod map;
mod parallel;
mod state;
mod task;

pub mod prelude;

pub use builder::StateMachineBuilder;
pub use choice::{ChoiceRule, ChoiceState, Comparison, Condition, DEFAULT_CHOICE_KEY};
pub use context::{Context, SharedContext};
pub use definition::{
    load_state_machine, CatchDefinition, ChoiceRuleDefinition, ChoiceStateDefinition,
    ConditionDefinition, MapStateDefinition, ParallelStateDefinition, PassStateDefinition,
    RetryDefinition, StateDefinition, StateMachineDefinition, TaskRegistry, TaskStateDefinition,
    WaitStateDefinition,
};
pub use error::{StateMachineError, TaskError, TIMEOUT_ERROR};
pub use machine::{StateMachine, DEFAULT_PACING};
pub use map::{MapState, ITEM_KEY};
pub use parallel::{ParallelState, PARALLEL_OUTPUT_KEY};
pub use state::{EndState, FailState, PassState, State, StateName, WaitState};
pub use task::{task_fn, CatchRule, RetryRule, TaskFuture, TaskHandler, TaskResult, TaskState};

pub use serde_json::Value;
pub use tokio_util::sync::CancellationToken;
