//! Execution context and operation descriptor
//!
//! [`ExecutionContext`] is an immutable value threaded through hooks and
//! handed to the operation. Hooks "modify" it by returning a new context
//! built with [`with_value`](ExecutionContext::with_value),
//! [`with_deadline`](ExecutionContext::with_deadline) or
//! [`with_cancellation`](ExecutionContext::with_cancellation). Data can be
//! added or shadowed but never removed, and a deadline can only move earlier.
//!
//! Cloning is a reference-count bump. Deadlines are read from tokio's clock,
//! so paused test time applies to them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Immutable, cancellable context for one execution
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Option<Arc<ValueNode>>,
}

/// Persistent singly-linked chain of values; newer entries shadow older ones
struct ValueNode {
    key: String,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

impl ExecutionContext {
    /// A root context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A root context cancelled through the given token
    pub fn with_token(token: CancellationToken) -> Self {
        Self { inner: Arc::new(ContextInner { token, deadline: None, values: None }) }
    }

    fn derive(&self, token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ContextInner { token, deadline, values: self.inner.values.clone() }),
        }
    }

    /// Derive a context carrying an extra value under `key`
    #[must_use]
    pub fn with_value<T>(&self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let node = ValueNode {
            key: key.into(),
            value: Arc::new(value),
            parent: self.inner.values.clone(),
        };
        Self {
            inner: Arc::new(ContextInner {
                token: self.inner.token.clone(),
                deadline: self.inner.deadline,
                values: Some(Arc::new(node)),
            }),
        }
    }

    /// Derive a context that expires at `deadline`
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        self.derive(self.inner.token.clone(), Some(deadline))
    }

    /// Derive a context that expires `timeout` from now
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with its own child cancellation token
    ///
    /// Cancelling the returned token cancels only the derived context;
    /// cancelling the parent still cancels both.
    #[must_use]
    pub fn with_cancellation(&self) -> (Self, CancellationToken) {
        let child = self.inner.token.child_token();
        (self.derive(child.clone(), self.inner.deadline), child)
    }

    /// Look up the most recent value stored under `key`
    pub fn value<T>(&self, key: &str) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        let mut node = self.inner.values.as_deref();
        while let Some(current) = node {
            if current.key == key {
                return current.value.downcast_ref::<T>();
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Whether any value is stored under `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    /// Keys from newest to oldest (shadowed keys appear more than once)
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::successors(self.inner.values.as_deref(), |node| node.parent.as_deref())
            .map(|node| node.key.as_str())
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// The cancellation token observed by this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Why the context is done, or `None` while it is still live
    ///
    /// Cancellation is reported ahead of an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is cancelled or expired
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context is cancelled or expires
    pub async fn done(&self) -> ContextError {
        tokio::select! {
            biased;
            () = self.inner.token.cancelled() => ContextError::Cancelled,
            () = wait_for_deadline(self.inner.deadline) => ContextError::DeadlineExceeded,
        }
    }

    /// Sleep for `delay`, returning early with the context error if the
    /// context finishes first
    pub async fn sleep(&self, delay: Duration) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Whether both handles refer to the same context value
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.inner.token.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Immutable descriptor of the operation being executed
///
/// Passed to hooks for observability only; the executor never interprets it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operation {
    name: String,
    args: Vec<Value>,
}

impl Operation {
    /// Describe an operation with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new() }
    }

    /// Describe an operation with the given arguments
    pub fn with_args<I, V>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self { name: name.into(), args: args.into_iter().map(Into::into).collect() }
    }

    /// Append one argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Operation name, e.g. `"GET"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in call order
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            match arg {
                Value::String(s) => write!(f, " {s}")?,
                other => write!(f, " {other}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestId(u64);

    #[test]
    fn test_with_value_does_not_mutate_parent() {
        let root = ExecutionContext::background();
        let child = root.with_value("request_id", RequestId(7));

        assert!(root.value::<RequestId>("request_id").is_none());
        assert_eq!(child.value::<RequestId>("request_id"), Some(&RequestId(7)));
        assert!(!root.ptr_eq(&child));
    }

    #[test]
    fn test_newer_value_shadows_older() {
        let ctx =
            ExecutionContext::background().with_value("span", "outer").with_value("span", "inner");

        assert_eq!(ctx.value::<&str>("span"), Some(&"inner"));
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["span", "span"]);
    }

    #[test]
    fn test_value_with_wrong_type_is_none() {
        let ctx = ExecutionContext::background().with_value("n", 1_u32);
        assert!(ctx.value::<String>("n").is_none());
        assert!(ctx.contains_key("n"));
    }

    #[test]
    fn test_deadline_only_moves_earlier() {
        let now = Instant::now();
        let ctx = ExecutionContext::background().with_deadline(now + Duration::from_secs(1));
        let later = ctx.with_deadline(now + Duration::from_secs(10));

        assert_eq!(later.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_values_survive_deadline_derivation() {
        let ctx = ExecutionContext::background()
            .with_value("tenant", "acme")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.value::<&str>("tenant"), Some(&"acme"));
    }

    #[test]
    fn test_err_reports_cancellation_first() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::with_token(token.clone()).with_deadline(Instant::now());
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        token.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_child_cancellation_is_scoped() {
        let root = ExecutionContext::background();
        let (child, token) = root.with_cancellation();

        token.cancel();
        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn test_sleep_completes_when_live() {
        let ctx = ExecutionContext::background();
        assert_eq!(ctx.sleep(Duration::from_millis(5)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_sleep_returns_on_cancellation() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::with_token(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(5)).await;
        canceller.await.expect("canceller task");

        assert_eq!(result, Err(ContextError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_returns_on_deadline() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(20));
        let result = ctx.sleep(Duration::from_secs(5)).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_follows_paused_clock() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_done());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }

    #[test]
    fn test_operation_descriptor() {
        let op = Operation::new("SET").with_arg("user:1").with_arg(30);
        assert_eq!(op.name(), "SET");
        assert_eq!(op.args().len(), 2);
        assert_eq!(op.to_string(), "SET user:1 30");

        let op = Operation::with_args("MGET", ["a", "b"]);
        assert_eq!(op.to_string(), "MGET a b");
    }
}
