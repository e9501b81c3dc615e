//! Pipeline stage: finalize empty error responses and captured faults
//!
//! The handler runs under capture. Afterwards the response is either left alone,
//! rewritten with a problem for its status, or rewritten with a problem for the
//! captured fault. A fault leaves this stage only as `Err(original)`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use problemkit_errors::Fault;

use crate::context::RequestContext;
use crate::factory::ProblemFactory;
use crate::options::ProblemDetailsOptions;
use crate::response::{ResponseSink, SinkError, prepare_response};

/// Failure while rewriting a response for a captured fault.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("failed to write problem: {0}")]
    Write(#[from] SinkError),

    #[error("problem details finalization panicked: {0}")]
    Panicked(String),
}

/// What happens to a captured fault after finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    Propagate,
}

/// Runs handlers and finalizes their responses.
#[derive(Debug, Clone)]
pub struct ProblemDetailsHandler {
    factory: Arc<ProblemFactory>,
}

impl ProblemDetailsHandler {
    #[must_use]
    pub fn new(factory: Arc<ProblemFactory>) -> Self {
        Self { factory }
    }

    #[must_use]
    pub fn from_options(options: Arc<ProblemDetailsOptions>) -> Self {
        Self::new(Arc::new(ProblemFactory::new(options)))
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<ProblemFactory> {
        &self.factory
    }

    /// Run `handler` against `response`, then finalize.
    ///
    /// A handler panic is captured like a returned fault.
    ///
    /// # Errors
    /// Returns the original fault when it must keep propagating.
    pub async fn run<R, F>(
        &self,
        ctx: &RequestContext,
        response: &mut R,
        handler: F,
    ) -> Result<(), Fault>
    where
        R: ResponseSink,
        F: AsyncFnOnce(&mut R) -> Result<(), Fault>,
    {
        let outcome = AssertUnwindSafe(handler(&mut *response))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Fault::from_panic(panic)));
        self.complete(ctx, response, outcome)
    }

    /// Finalize `response` for the outcome of a handler that already ran.
    ///
    /// # Errors
    /// Returns the original fault when it must keep propagating.
    pub fn complete<R: ResponseSink>(
        &self,
        ctx: &RequestContext,
        response: &mut R,
        outcome: Result<(), Fault>,
    ) -> Result<(), Fault> {
        match outcome {
            Ok(()) => {
                if response.has_problem() {
                    self.handle_response_problem(ctx, response);
                }
                Ok(())
            }
            Err(fault) => self.handle_fault(ctx, response, fault),
        }
    }

    fn handle_response_problem<R: ResponseSink>(&self, ctx: &RequestContext, response: &mut R) {
        if response.has_started() {
            tracing::warn!(
                path = %ctx.path(),
                "The response was already started; problem details will not be written"
            );
            return;
        }

        let status = response.status();
        prepare_response(response, status);
        let problem = self.factory.from_status(ctx, status);
        if let Err(err) = response.write_problem(&problem) {
            tracing::error!(error = %err, path = %ctx.path(), "Failed to write problem details");
        }
    }

    fn handle_fault<R: ResponseSink>(
        &self,
        ctx: &RequestContext,
        response: &mut R,
        fault: Fault,
    ) -> Result<(), Fault> {
        if response.has_started() {
            tracing::warn!(
                path = %ctx.path(),
                category = %fault.category(),
                "The response was already started; problem details will not be written"
            );
            return Err(fault);
        }

        let attempt = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.try_handle_fault(ctx, response, &fault)
        }))
        .unwrap_or_else(|panic| {
            Err(FinalizeError::Panicked(
                Fault::from_panic(panic).message().to_owned(),
            ))
        });

        match attempt {
            Ok(Disposition::Handled) => Ok(()),
            Ok(Disposition::Propagate) => Err(fault),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    path = %ctx.path(),
                    fault = %fault,
                    "Failed to produce problem details; propagating the original fault"
                );
                Err(fault)
            }
        }
    }

    fn try_handle_fault<R: ResponseSink>(
        &self,
        ctx: &RequestContext,
        response: &mut R,
        fault: &Fault,
    ) -> Result<Disposition, FinalizeError> {
        prepare_response(response, StatusCode::INTERNAL_SERVER_ERROR);

        let Some(problem) = self.factory.from_fault(ctx, fault, response.status()) else {
            tracing::info!(
                path = %ctx.path(),
                category = %fault.category(),
                "A fault occurred but was ignored by the problem mappings"
            );
            return Ok(Disposition::Propagate);
        };

        let options = self.factory.options();
        if options.log_unhandled(ctx, fault, &problem) {
            tracing::error!(
                error = ?fault,
                status = problem.status.as_u16(),
                method = %ctx.method(),
                path = %ctx.path(),
                trace_id = ctx.trace_id(),
                "An unhandled fault occurred while executing the request"
            );
        }

        response.write_problem(&problem)?;
        options.notify_handled(ctx, fault);

        if options.registry().should_rethrow(ctx, fault) {
            Ok(Disposition::Propagate)
        } else {
            Ok(Disposition::Handled)
        }
    }
}
