//! Task states: units of work with timeout, retry, and catch handling.

use crate::context::SharedContext;
use crate::error::{StateMachineError, TaskError};
use crate::state::StateName;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a unit of work.
pub type TaskResult = Result<(), TaskError>;

/// Boxed future returned by a unit of work.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// A unit of work executed by a [`TaskState`].
///
/// This is the extension point for domain logic: the engine owns the
/// graph and the failure-handling protocol, callers own the work.
/// Handlers receive the run's cancellation token (a timed-out attempt
/// is signalled through it, never aborted) and a handle to the run's
/// context.
///
/// Closures returning a [`TaskFuture`] implement this trait; use
/// [`task_fn`] to adapt an async closure.
///
/// # Examples
///
/// ```
/// use kumihimo::{task_fn, TaskError};
///
/// let handler = task_fn(|_token, ctx| async move {
///     let mut guard = ctx.lock().await;
///     let checked = guard.get_f64("balance").ok_or_else(|| {
///         TaskError::named("MISSING_BALANCE", "no balance in context")
///     })?;
///     guard.insert("balance_ok", checked >= 0.0);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Performs the work.
    ///
    /// A handler that may run long should observe `token` and return
    /// early once it is cancelled.
    async fn call(&self, token: CancellationToken, ctx: SharedContext) -> TaskResult;
}

#[async_trait]
impl<F> TaskHandler for F
where
    F: Fn(CancellationToken, SharedContext) -> TaskFuture + Send + Sync,
{
    async fn call(&self, token: CancellationToken, ctx: SharedContext) -> TaskResult {
        (self)(token, ctx).await
    }
}

/// Adapts an async closure into a shareable [`TaskHandler`].
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(CancellationToken, SharedContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Arc::new(move |token: CancellationToken, ctx: SharedContext| -> TaskFuture {
        Box::pin(f(token, ctx))
    })
}

/// Retries a task on a matching named error, up to a bounded count.
///
/// Rules are scanned in declaration order; the first rule whose name
/// matches the error wins. A rule with `max_attempts = k` allows `k`
/// re-attempts, so the task executes at most `k + 1` times.
#[derive(Debug, Clone)]
pub struct RetryRule {
    /// Symbolic error name this rule matches.
    pub error_name: String,
    /// Delay between attempts.
    pub interval: Duration,
    /// Maximum number of re-attempts after the first failure.
    pub max_attempts: u32,
}

impl RetryRule {
    /// Creates a retry rule.
    pub fn new(error_name: impl Into<String>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            error_name: error_name.into(),
            interval,
            max_attempts,
        }
    }
}

/// Redirects execution to a named state when a task's error matches.
///
/// Catch rules are consulted only after retry rules are exhausted; a
/// match swallows the error.
#[derive(Debug, Clone)]
pub struct CatchRule {
    /// Symbolic error name this rule matches.
    pub error_name: String,
    /// State to transition to when the rule matches.
    pub next: StateName,
}

impl CatchRule {
    /// Creates a catch rule.
    pub fn new(error_name: impl Into<String>, next: impl Into<StateName>) -> Self {
        Self {
            error_name: error_name.into(),
            next: next.into(),
        }
    }
}

/// Runs a unit of work and decides the next state from its outcome.
///
/// Each attempt is spawned as its own tokio task and, when a timeout is
/// configured, raced against a timer. A timed-out attempt produces the
/// named [`TIMEOUT`](crate::TIMEOUT_ERROR) error; the spawned work is
/// abandoned, not aborted, and is expected to observe its cancellation
/// token cooperatively.
pub struct TaskState {
    name: StateName,
    handler: Option<Arc<dyn TaskHandler>>,
    next: Option<StateName>,
    timeout: Option<Duration>,
    retries: Vec<RetryRule>,
    catches: Vec<CatchRule>,
}

impl TaskState {
    /// Creates a task state running `handler`.
    ///
    /// The task is terminal until [`next`](Self::next) is set.
    pub fn new(name: impl Into<StateName>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler: Some(handler),
            next: None,
            timeout: None,
            retries: Vec::new(),
            catches: Vec::new(),
        }
    }

    /// Creates a task state with no unit of work.
    ///
    /// Such a task executes as a no-op success and advances to `next`.
    /// The document loader produces these for task names with no
    /// registered handler.
    pub fn unbound(name: impl Into<StateName>) -> Self {
        Self {
            name: name.into(),
            handler: None,
            next: None,
            timeout: None,
            retries: Vec::new(),
            catches: Vec::new(),
        }
    }

    /// Sets the state to transition to on success.
    pub fn next(mut self, next: impl Into<StateName>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Bounds each attempt to `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Appends a retry rule. Rules match in the order they were added.
    pub fn retry(mut self, rule: RetryRule) -> Self {
        self.retries.push(rule);
        self
    }

    /// Appends a catch rule. Rules match in the order they were added.
    pub fn catch(mut self, rule: CatchRule) -> Self {
        self.catches.push(rule);
        self
    }

    /// Returns the state's name.
    pub fn name(&self) -> &StateName {
        &self.name
    }

    pub(crate) fn targets(&self) -> Vec<&StateName> {
        self.next
            .iter()
            .chain(self.catches.iter().map(|rule| &rule.next))
            .collect()
    }

    pub(crate) async fn execute(
        &self,
        token: &CancellationToken,
        ctx: &SharedContext,
    ) -> Result<Option<StateName>, StateMachineError> {
        info!("executing task state '{}'", self.name);

        let mut attempt: u32 = 0;
        let failure = loop {
            match self.run_attempt(token, ctx).await {
                Ok(()) => return Ok(self.next.clone()),
                Err(error) => {
                    warn!(
                        "task '{}' failed on attempt {}: {}",
                        self.name,
                        attempt + 1,
                        error
                    );
                    let matched = error
                        .error_name()
                        .and_then(|name| self.retries.iter().find(|rule| rule.error_name == name));
                    match matched {
                        Some(rule) if attempt < rule.max_attempts => {
                            tokio::time::sleep(rule.interval).await;
                            attempt += 1;
                        }
                        _ => break error,
                    }
                }
            }
        };

        if let Some(name) = failure.error_name() {
            if let Some(rule) = self.catches.iter().find(|rule| rule.error_name == name) {
                info!(
                    "task '{}' caught '{}', transitioning to '{}'",
                    self.name, name, rule.next
                );
                return Ok(Some(rule.next.clone()));
            }
        }

        Err(StateMachineError::Task(failure))
    }

    async fn run_attempt(&self, token: &CancellationToken, ctx: &SharedContext) -> TaskResult {
        let Some(handler) = &self.handler else {
            // No unit of work registered: succeed and move on.
            return Ok(());
        };

        let attempt_token = token.child_token();
        let mut handle = tokio::spawn({
            let handler = Arc::clone(handler);
            let token = attempt_token.clone();
            let ctx = Arc::clone(ctx);
            async move { handler.call(token, ctx).await }
        });

        match self.timeout {
            Some(timeout) => tokio::select! {
                joined = &mut handle => flatten_join(joined),
                _ = tokio::time::sleep(timeout) => {
                    attempt_token.cancel();
                    Err(TaskError::timeout())
                }
                _ = token.cancelled() => {
                    attempt_token.cancel();
                    Err(TaskError::timeout())
                }
            },
            None => tokio::select! {
                joined = &mut handle => flatten_join(joined),
                _ = token.cancelled() => {
                    attempt_token.cancel();
                    Err(TaskError::timeout())
                }
            },
        }
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("name", &self.name)
            .field("next", &self.next)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("catches", &self.catches)
            .finish()
    }
}

fn flatten_join(joined: Result<TaskResult, JoinError>) -> TaskResult {
    match joined {
        Ok(result) => result,
        Err(error) => Err(TaskError::plain(format!("task panicked: {error}"))),
    }
}
