//! Concurrency primitives for drone-fleet.
//!
//! This crate provides the building blocks the drone lifecycle is made of:
//!
//! - [`pipeline`]: sequential async steps that can short-circuit with a final result
//! - [`bulk_call`]: per-item calls transparently grouped into bulk backend calls
//! - [`cache`]: a time-bounded, coalescing snapshot of a bulk status query
//! - [`executor`]: running commands locally or over a multiplexed SSH connection
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use drone_fleet_utils::BulkCall;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let squares: BulkCall<u64, u64, std::io::Error> = BulkCall::new(
//!     |items: Vec<u64>| async move { Ok(Some(items.into_iter().map(|i| i * i).collect())) },
//!     10,
//!     Duration::from_millis(5),
//! );
//!
//! assert_eq!(squares.invoke(7).await.unwrap(), Some(49));
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bulk_call;
pub mod cache;
pub mod error;
pub mod executor;
pub mod pipeline;

pub use bulk_call::{BulkCall, BulkResult};
pub use cache::AsyncCacheMap;
pub use error::{BulkCallError, CommandExecutionFailure, ExecutorError};
pub use executor::{CommandResult, Executor, ShellExecutor, SshConfig, SshExecutor};
pub use pipeline::{run_pipeline, Processing, Step};
