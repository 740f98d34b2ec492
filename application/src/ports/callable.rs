//! Callable port
//!
//! The closed capability interface every admitted tool implementation is bound
//! behind. The gateway never discovers entry points reflectively; a loader
//! hands back an `Arc<dyn Callable>` for the declared binding.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use toolgate_domain::TypedArguments;

/// How a single invocation failed, as seen by the execution wrapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The tool body raised an error.
    #[error("tool raised an error: {0}")]
    Internal(String),
    /// The tool signalled rate limiting or back-pressure; worth retrying.
    #[error("tool reported back-pressure: {0}")]
    Transient(String),
    /// The invocation observed its cancellation token.
    #[error("invocation cancelled")]
    Cancelled,
}

/// An admitted, loaded tool implementation.
#[async_trait]
pub trait Callable: Send + Sync {
    /// Run the tool's entry point once.
    ///
    /// Implementations should stop promptly once `cancel` fires; the wrapper
    /// has already given up on the result by then.
    async fn invoke(
        &self,
        args: &TypedArguments,
        cancel: CancellationToken,
    ) -> Result<String, InvocationError>;
}
