//! Payload factories
//!
//! [`ProblemDetailsFactory`] is the baseline capability: build a problem for a
//! status or for a set of validation errors. [`DefaultProblemFactory`] implements
//! it from the client error catalog. [`ProblemFactory`] wraps any baseline and adds
//! fault mapping through the [`RuleRegistry`](crate::registry::RuleRegistry).

use std::sync::Arc;

use http::{StatusCode, Uri};
use problemkit_errors::{
    ClientErrorMapping, EXCEPTION_EXTENSION, ExceptionDetails, Fault, Problem, StatusCodeExt,
    TRACE_ID_EXTENSION, VALIDATION_TITLE, ValidationErrors,
};

use crate::context::RequestContext;
use crate::options::ProblemDetailsOptions;

/// Baseline problem construction supplied by the host.
pub trait ProblemDetailsFactory: Send + Sync {
    /// Build the baseline problem for `status`, with an optional `detail`.
    fn create_problem(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        detail: Option<&str>,
    ) -> Problem;

    /// Build a problem carrying field validation errors.
    fn create_validation_problem(
        &self,
        ctx: &RequestContext,
        errors: &ValidationErrors,
        status: StatusCode,
    ) -> Problem;
}

/// Baseline factory backed by the client error catalog.
#[derive(Debug, Clone, Default)]
pub struct DefaultProblemFactory {
    client_errors: ClientErrorMapping,
}

impl DefaultProblemFactory {
    #[must_use]
    pub fn new(client_errors: ClientErrorMapping) -> Self {
        Self { client_errors }
    }

    fn baseline(&self, ctx: &RequestContext, status: StatusCode) -> Problem {
        let mut problem = match self.client_errors.get(status) {
            Some(data) => data.as_problem(status),
            None => Problem::from_status(status),
        };
        if let Some(trace_id) = ctx.trace_id() {
            problem.try_add_extension(TRACE_ID_EXTENSION, trace_id);
        }
        problem
    }
}

impl ProblemDetailsFactory for DefaultProblemFactory {
    fn create_problem(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        detail: Option<&str>,
    ) -> Problem {
        let mut problem = self.baseline(ctx, status);
        problem.detail = detail.map(ToOwned::to_owned);
        problem
    }

    fn create_validation_problem(
        &self,
        ctx: &RequestContext,
        errors: &ValidationErrors,
        status: StatusCode,
    ) -> Problem {
        let mut problem = self.baseline(ctx, status).with_validation_errors(errors);
        problem.title = VALIDATION_TITLE.to_owned();
        problem
    }
}

/// Fault-aware factory layered over a baseline [`ProblemDetailsFactory`].
#[derive(Clone)]
pub struct ProblemFactory {
    baseline: Arc<dyn ProblemDetailsFactory>,
    options: Arc<ProblemDetailsOptions>,
}

impl ProblemFactory {
    /// Use the catalog-backed baseline with the options' type links.
    #[must_use]
    pub fn new(options: Arc<ProblemDetailsOptions>) -> Self {
        let baseline = DefaultProblemFactory::new(options.client_error_mapping());
        Self::with_baseline(options, Arc::new(baseline))
    }

    #[must_use]
    pub fn with_baseline(
        options: Arc<ProblemDetailsOptions>,
        baseline: Arc<dyn ProblemDetailsFactory>,
    ) -> Self {
        Self { baseline, options }
    }

    #[must_use]
    pub fn options(&self) -> &ProblemDetailsOptions {
        &self.options
    }

    /// Baseline problem for a response that only carries a status.
    pub fn from_status(&self, ctx: &RequestContext, status: StatusCode) -> Problem {
        self.baseline.create_problem(ctx, status, None)
    }

    /// Problem for a fault.
    ///
    /// `current_status` is the status already set on the response; it is used when
    /// no rule resolves a status. Returns `None` when neither a rule nor the
    /// current status yields a problem status, meaning the response must be left
    /// alone.
    #[must_use]
    pub fn from_fault(
        &self,
        ctx: &RequestContext,
        fault: &Fault,
        current_status: StatusCode,
    ) -> Option<Problem> {
        let registry = self.options.registry();
        let mut problem = if let Some(status) = registry.resolve_status(ctx, fault) {
            registry
                .resolve_payload(ctx, fault, status, self)
                .unwrap_or_else(|| self.from_status(ctx, status))
        } else if current_status.is_problem() {
            self.from_status(ctx, current_status)
        } else {
            return None;
        };

        if self.options.include_exception_details(ctx, fault) {
            add_exception_details(&mut problem, fault);
        }
        Some(problem)
    }

    /// Problem carrying field validation errors.
    pub fn from_validation_errors(
        &self,
        ctx: &RequestContext,
        errors: &ValidationErrors,
        status: StatusCode,
    ) -> Problem {
        self.baseline.create_validation_problem(ctx, errors, status)
    }
}

impl ProblemDetailsFactory for ProblemFactory {
    fn create_problem(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        detail: Option<&str>,
    ) -> Problem {
        self.baseline.create_problem(ctx, status, detail)
    }

    fn create_validation_problem(
        &self,
        ctx: &RequestContext,
        errors: &ValidationErrors,
        status: StatusCode,
    ) -> Problem {
        self.baseline.create_validation_problem(ctx, errors, status)
    }
}

impl std::fmt::Debug for ProblemFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemFactory")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn add_exception_details(problem: &mut Problem, fault: &Fault) {
    if problem.detail.is_none() {
        problem.detail = Some(fault.message().to_owned());
    }
    if problem.instance.is_none() {
        problem.instance = fault.help_link().and_then(absolute_uri);
    }
    let details = ExceptionDetails::from(fault);
    if let Ok(value) = serde_json::to_value(details) {
        problem.try_add_extension(EXCEPTION_EXTENSION, value);
    }
}

fn absolute_uri(link: &str) -> Option<String> {
    let link = link.trim();
    let uri = link.parse::<Uri>().ok()?;
    uri.scheme().is_some().then(|| uri.to_string())
}
