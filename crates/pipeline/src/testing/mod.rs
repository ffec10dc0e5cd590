//! Test helpers for code built on the pipeline
//!
//! - **[`RecordingHook`]**: a hook of every category that logs each event it
//!   receives as a short string
//! - **[`FlakyOperation`]**: an operation that fails a fixed number of times
//!   before succeeding
//! - **[`TestError`]**: a plain error type whose message drives
//!   classification
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use steadfast_pipeline::testing::{FlakyOperation, RecordingHook};
//! use steadfast_pipeline::{CompositeHook, ExecutionContext, Executor, FixedBackoff, Operation};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let recorder = Arc::new(RecordingHook::new());
//! let hooks = Arc::new(CompositeHook::new());
//! hooks.add_hook(recorder.clone());
//!
//! let executor = Executor::builder()
//!     .retry_policy(Arc::new(FixedBackoff::new(3, std::time::Duration::from_millis(1))))
//!     .hooks(hooks)
//!     .build();
//!
//! let flaky = FlakyOperation::new(1);
//! let attempt = executor
//!     .execute(&ExecutionContext::background(), &Operation::new("GET"), |ctx| flaky.call(ctx))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(attempt, 2);
//! assert_eq!(recorder.count("after_execution:"), 2);
//! # }
//! ```

pub mod mocks;

pub use mocks::{FlakyOperation, RecordingHook, TestError};
