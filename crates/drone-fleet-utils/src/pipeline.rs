//! Sequential processing pipelines.
//!
//! A pipeline is an ordered list of asynchronous [`Step`]s. Each step receives the
//! value produced by the previous one together with a shared mutable context, and
//! either hands a value on ([`Processing::Continue`]) or ends the pipeline early with
//! a final result ([`Processing::Stop`]). Errors are not special: the first step that
//! fails aborts the pipeline and the error is returned to the caller unchanged.
//!
//! ```
//! use async_trait::async_trait;
//! use drone_fleet_utils::pipeline::{run_pipeline, Processing, Step};
//!
//! struct Double;
//!
//! #[async_trait]
//! impl Step<u32, Vec<&'static str>, ()> for Double {
//!     async fn process(&self, input: u32, trail: &mut Vec<&'static str>) -> Result<Processing<u32>, ()> {
//!         trail.push("double");
//!         Ok(Processing::Continue(input * 2))
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let mut trail = Vec::new();
//! let steps: [&dyn Step<u32, Vec<&'static str>, ()>; 2] = [&Double, &Double];
//! let result = run_pipeline(3, &steps, &mut trail).await;
//! assert_eq!(result, Ok(12));
//! assert_eq!(trail, ["double", "double"]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;

/// Outcome of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing<T> {
    /// Pass the value on to the next step.
    Continue(T),
    /// Skip all remaining steps and return this value from the pipeline.
    Stop(T),
}

impl<T> Processing<T> {
    /// Return the carried value, regardless of the variant.
    pub fn into_inner(self) -> T {
        match self {
            Self::Continue(value) | Self::Stop(value) => value,
        }
    }
}

/// One step of a processing pipeline.
///
/// `T` is the value threaded through the pipeline, `C` the context every step is
/// called with and `E` the error type.
#[async_trait]
pub trait Step<T, C, E>: Send + Sync
where
    T: Send + 'static,
    C: Send,
    E: Send + 'static,
{
    /// Process `input` and decide whether the pipeline continues.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline and is returned by [`run_pipeline`].
    async fn process(&self, input: T, context: &mut C) -> Result<Processing<T>, E>;
}

/// Run `steps` in order, threading each step's output into the next.
///
/// Returns the value of the first [`Processing::Stop`], or the output of the last step
/// if none stopped. An empty pipeline returns `input`.
///
/// # Errors
///
/// Returns the first error raised by a step; later steps are not run.
pub async fn run_pipeline<T, C, E>(
    input: T,
    steps: &[&dyn Step<T, C, E>],
    context: &mut C,
) -> Result<T, E>
where
    T: Send + 'static,
    C: Send,
    E: Send + 'static,
{
    let mut value = input;
    for step in steps {
        match step.process(value, context).await? {
            Processing::Continue(next) => value = next,
            Processing::Stop(result) => return Ok(result),
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Vec<(&'static str, u32)>;
    type TestStep = dyn Step<u32, Calls, String>;

    /// Records every call in the context and returns a fixed outcome.
    struct Recorder {
        name: &'static str,
        outcome: fn(u32) -> Result<Processing<u32>, String>,
    }

    #[async_trait]
    impl Step<u32, Calls, String> for Recorder {
        async fn process(&self, input: u32, calls: &mut Calls) -> Result<Processing<u32>, String> {
            calls.push((self.name, input));
            (self.outcome)(input)
        }
    }

    const ADD_ONE: Recorder = Recorder {
        name: "add_one",
        outcome: |v| Ok(Processing::Continue(v + 1)),
    };

    const STOP_WITH_42: Recorder = Recorder {
        name: "stop",
        outcome: |_| Ok(Processing::Stop(42)),
    };

    const FAIL: Recorder = Recorder {
        name: "fail",
        outcome: |v| Err(format!("failed at {v}")),
    };

    #[tokio::test]
    async fn threads_values_in_order() {
        let mut calls = Vec::new();
        let steps: [&TestStep; 3] = [&ADD_ONE, &ADD_ONE, &ADD_ONE];
        let result = run_pipeline(1, &steps, &mut calls).await;

        assert_eq!(result, Ok(4));
        assert_eq!(calls, vec![("add_one", 1), ("add_one", 2), ("add_one", 3)]);
    }

    #[tokio::test]
    async fn empty_pipeline_returns_input() {
        let mut calls = Vec::new();
        let steps: [&TestStep; 0] = [];
        let result = run_pipeline(7, &steps, &mut calls).await;

        assert_eq!(result, Ok(7));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn stop_short_circuits() {
        let mut calls = Vec::new();
        let steps: [&TestStep; 2] = [&STOP_WITH_42, &ADD_ONE];
        let result = run_pipeline(1, &steps, &mut calls).await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls, vec![("stop", 1)]);
    }

    #[tokio::test]
    async fn errors_propagate_and_abort() {
        let mut calls = Vec::new();
        let steps: [&TestStep; 3] = [&ADD_ONE, &FAIL, &ADD_ONE];
        let result = run_pipeline(5, &steps, &mut calls).await;

        assert_eq!(result, Err("failed at 6".to_string()));
        assert_eq!(calls, vec![("add_one", 5), ("fail", 6)]);
    }

    #[test]
    fn processing_into_inner() {
        assert_eq!(Processing::Continue(3).into_inner(), 3);
        assert_eq!(Processing::Stop(4).into_inner(), 4);
    }
}
