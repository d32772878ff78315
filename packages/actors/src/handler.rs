//! Processor trait and function-based processors.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

/// Result type for processors: the job result, or an error message.
pub type ProcessorResult = Result<Value, String>;

/// Future type for async processors.
pub type ProcessorFuture = Pin<Box<dyn Future<Output = ProcessorResult> + Send>>;

/// Trait for job processors.
///
/// Implement this trait to define how jobs of a specific type are processed.
/// A processor only ever sees the job payload.
pub trait Processor: Send + Sync + 'static {
    /// The job type this processor handles.
    fn job_type(&self) -> &str;

    /// Process a payload and return the result.
    fn process(&self, payload: Value) -> ProcessorFuture;
}

/// A simple function-based processor.
pub struct FnProcessor<F>
where
    F: Fn(Value) -> ProcessorFuture + Send + Sync + 'static,
{
    job_type: String,
    processor: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(Value) -> ProcessorFuture + Send + Sync + 'static,
{
    /// Create a new function-based processor.
    pub fn new(job_type: impl Into<String>, processor: F) -> Self {
        Self {
            job_type: job_type.into(),
            processor,
        }
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(Value) -> ProcessorFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn process(&self, payload: Value) -> ProcessorFuture {
        (self.processor)(payload)
    }
}

/// Helper macro for creating processors from async bodies.
///
/// ```ignore
/// let echo = processor!("echo", |payload| Ok(payload));
/// ```
#[macro_export]
macro_rules! processor {
    ($job_type:expr, |$payload:ident| $body:expr) => {
        $crate::FnProcessor::new($job_type, |$payload: $crate::serde_json::Value| {
            Box::pin(async move { $body })
        })
    };
}
