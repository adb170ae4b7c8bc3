//! Execution context shared between states of a single run.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Handle to the context of a running state machine.
///
/// Task handlers execute on their own tokio task and mutate the run's
/// context through this handle. The run loop executes one state at a
/// time, so within a run the lock is uncontended except for a task
/// attempt that outlived its timeout.
pub type SharedContext = Arc<Mutex<Context>>;

/// Key/value store threaded through one run of a state machine.
///
/// Values are JSON-typed ([`serde_json::Value`]): strings, numbers,
/// booleans, arrays and nested objects. A value written by one state is
/// visible to every later state of the same run until overwritten.
/// Typed accessors return `None` on a missing key or a mismatched type
/// instead of coercing.
///
/// # Examples
///
/// ```
/// use kumihimo::Context;
///
/// let mut ctx = Context::new();
/// ctx.insert("user_id", 123);
/// ctx.insert("name", "Alice");
/// ctx.insert("active", true);
///
/// assert_eq!(ctx.get_f64("user_id"), Some(123.0));
/// assert_eq!(ctx.get_str("name"), Some("Alice"));
/// assert_eq!(ctx.get_bool("active"), Some(true));
///
/// // Wrong type returns None
/// assert_eq!(ctx.get_str("user_id"), None);
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    data: HashMap<String, Value>,
    started_at: Instant,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Inserts a value with the given key.
    ///
    /// If the key already exists, the previous value is replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Returns a reference to the value for the given key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns the value for the given key as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Returns the value for the given key as a number.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Returns the value for the given key as a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// Returns the value for the given key as an array.
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.data.get(key).and_then(Value::as_array)
    }

    /// Removes a value by key and returns it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Returns `true` if the context contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the context.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns the number of entries in the context.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the context contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Wraps the context for use by a running state machine.
    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Folds the context into a single JSON object.
    ///
    /// Map and Parallel states use this to collect a finished branch's
    /// output into the parent context.
    pub fn into_value(self) -> Value {
        Value::Object(self.data.into_iter().collect())
    }
}
