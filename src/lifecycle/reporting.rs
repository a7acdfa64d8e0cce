//! Sink for failures that happen away from any caller: handler faults, timeout handler
//! faults and store errors raised while dispatching.

use tracing::error;

use crate::error::ComponentError;

pub trait ExceptionReporter: Send + Sync {
    fn report(&self, context: &str, error: &ComponentError);
}

/// Reports through `tracing` at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExceptionReporter;

impl ExceptionReporter for TracingExceptionReporter {
    fn report(&self, context: &str, error: &ComponentError) {
        error!(
            context = %context,
            error = %error,
            misconfiguration = error.is_misconfiguration(),
            "💥 Component engine failure"
        );
    }
}
