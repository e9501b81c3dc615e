//! Result interceptor: turn special handler results into problems
//!
//! Handlers return an [`ObjectResult`] to hand a value to the engine before it is
//! rendered. Validation maps, plain detail strings with an error status and
//! returned faults are rewritten into problems; everything else renders as is.

use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use problemkit_errors::{
    APPLICATION_PROBLEM_JSON, Fault, PROBLEM_CONTENT_TYPES, Problem, StatusCodeExt, ValidationErrors,
    categories,
};

use crate::context::RequestContext;
use crate::factory::{ProblemDetailsFactory, ProblemFactory};

const APPLICATION_JSON: &str = "application/json";
const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";

/// Value carried by an [`ObjectResult`].
#[derive(Debug, Clone)]
pub enum ResultValue {
    Problem(Problem),
    Validation(ValidationErrors),
    Detail(String),
    Fault(Fault),
    Json(serde_json::Value),
}

/// Handler result rendered by the problem details service.
#[derive(Debug, Clone)]
pub struct ObjectResult {
    pub status: Option<StatusCode>,
    pub value: ResultValue,
    /// Media types the result may be written as, in preference order.
    pub content_types: Vec<&'static str>,
}

impl ObjectResult {
    #[must_use]
    pub fn new(value: ResultValue) -> Self {
        Self {
            status: None,
            value,
            content_types: Vec::new(),
        }
    }

    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::new(ResultValue::Json(value))
    }

    #[must_use]
    pub fn validation(errors: ValidationErrors) -> Self {
        Self::new(ResultValue::Validation(errors))
    }

    #[must_use]
    pub fn detail(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::new(ResultValue::Detail(detail.into())).with_status(status)
    }

    #[must_use]
    pub fn fault(fault: Fault) -> Self {
        Self::new(ResultValue::Fault(fault))
    }

    /// Problem result declaring the problem media types.
    #[must_use]
    pub fn problem(problem: Problem) -> Self {
        Self {
            status: Some(problem.status),
            value: ResultValue::Problem(problem),
            content_types: PROBLEM_CONTENT_TYPES.to_vec(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_content_types(mut self, content_types: Vec<&'static str>) -> Self {
        self.content_types = content_types;
        self
    }

    /// Render into an HTTP response.
    ///
    /// # Errors
    /// A [`ResultValue::Fault`] is returned as `Err` so it is handled like a raised fault.
    pub fn render(self) -> Result<Response, Fault> {
        let Self {
            status,
            value,
            content_types,
        } = self;
        let json_type = |default: &'static str| {
            content_types
                .iter()
                .copied()
                .find(|ct| ct.ends_with("json"))
                .unwrap_or(default)
        };

        let (status, content_type, body) = match value {
            ResultValue::Fault(fault) => return Err(fault),
            ResultValue::Problem(problem) => (
                status.unwrap_or(problem.status),
                json_type(APPLICATION_PROBLEM_JSON),
                serde_json::to_vec(&problem),
            ),
            ResultValue::Validation(errors) => (
                status.unwrap_or(StatusCode::BAD_REQUEST),
                json_type(APPLICATION_JSON),
                serde_json::to_vec(&errors),
            ),
            ResultValue::Json(value) => (
                status.unwrap_or(StatusCode::OK),
                json_type(APPLICATION_JSON),
                serde_json::to_vec(&value),
            ),
            ResultValue::Detail(detail) => (
                status.unwrap_or(StatusCode::OK),
                TEXT_PLAIN_UTF_8,
                Ok(detail.into_bytes()),
            ),
        };

        let body = body.map_err(|e| Fault::from_error(&categories::ANY, &e))?;
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(response)
    }
}

/// Response extension carrying a result the interceptor has not seen yet.
#[derive(Debug, Clone)]
pub struct PendingResult(pub ObjectResult);

impl IntoResponse for ObjectResult {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        response.extensions_mut().insert(PendingResult(self));
        response
    }
}

/// Rewrites special [`ObjectResult`] shapes into problem results.
#[derive(Debug, Clone)]
pub struct ResultInterceptor {
    factory: Arc<ProblemFactory>,
}

impl ResultInterceptor {
    #[must_use]
    pub fn new(factory: Arc<ProblemFactory>) -> Self {
        Self { factory }
    }

    /// Normalize `result` before it is rendered.
    ///
    /// Checks in order: already a problem, validation errors, non-problem status,
    /// detail string, fault. The first applicable shape decides.
    #[must_use]
    pub fn on_result_executing(&self, ctx: &RequestContext, result: ObjectResult) -> ObjectResult {
        if matches!(result.value, ResultValue::Problem(_)) {
            return result;
        }
        if let ResultValue::Validation(errors) = &result.value {
            let status = result.status.unwrap_or(StatusCode::BAD_REQUEST);
            return ObjectResult::problem(self.factory.from_validation_errors(ctx, errors, status));
        }

        let Some(status) = result.status.filter(|status| status.is_problem()) else {
            return result;
        };

        let replaced = match &result.value {
            ResultValue::Detail(detail) => Some(self.factory.create_problem(ctx, status, Some(detail.as_str()))),
            // `None` means the mappings opted out; the fault stays as returned.
            ResultValue::Fault(fault) => self.factory.from_fault(ctx, fault, status),
            _ => None,
        };
        replaced.map_or(result, ObjectResult::problem)
    }
}
