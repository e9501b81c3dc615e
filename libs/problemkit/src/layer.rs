//! Tower layer wiring the result interceptor and the pipeline around a service
//!
//! An unconverted returned fault is finalized like a raised one, starting from 500.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use futures_util::FutureExt;
use http::{Request, Response, header};
use http_body::Body as HttpBody;
use problemkit_errors::{Fault, RaisedFault, StatusCodeExt};
use tower::{Layer, Service};

use crate::context::RequestContext;
use crate::factory::ProblemFactory;
use crate::interceptor::{PendingResult, ResultInterceptor};
use crate::options::ProblemDetailsOptions;
use crate::pipeline::ProblemDetailsHandler;
use crate::response::BufferedResponse;

/// Tower layer converting faults and empty error responses into problem details
///
/// Handles, for every request:
/// - `Err` returned by the inner service, and panics while it runs
/// - responses raised from a [`Fault`] (see [`RaisedFault`])
/// - [`ObjectResult`](crate::interceptor::ObjectResult) responses, via the result interceptor
/// - responses with a problem status and no body
///
/// A fault that must keep propagating is returned as the service error; wrap
/// the layer in axum's `HandleErrorLayer` to observe it.
#[derive(Clone)]
pub struct ProblemDetailsLayer {
    handler: ProblemDetailsHandler,
    interceptor: ResultInterceptor,
}

impl ProblemDetailsLayer {
    #[must_use]
    pub fn new(options: Arc<ProblemDetailsOptions>) -> Self {
        Self::with_factory(Arc::new(ProblemFactory::new(options)))
    }

    /// Use a factory built over a host-supplied baseline.
    #[must_use]
    pub fn with_factory(factory: Arc<ProblemFactory>) -> Self {
        Self {
            handler: ProblemDetailsHandler::new(Arc::clone(&factory)),
            interceptor: ResultInterceptor::new(factory),
        }
    }
}

impl<S> Layer<S> for ProblemDetailsLayer {
    type Service = ProblemDetailsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ProblemDetailsService {
            inner,
            handler: self.handler.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Service produced by [`ProblemDetailsLayer`]
#[derive(Clone)]
pub struct ProblemDetailsService<S> {
    inner: S,
    handler: ProblemDetailsHandler,
    interceptor: ResultInterceptor,
}

impl<S, B, ResBody> Service<Request<B>> for ProblemDetailsService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<Fault> + Send + 'static,
    B: Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<axum::BoxError>,
{
    type Response = Response<Body>;
    type Error = Fault;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let ctx = RequestContext::from_request(&req);

        // Swap so we call the instance that was poll_ready'd
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let handler = self.handler.clone();
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { inner.call(req).await })
                .catch_unwind()
                .await;

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => return finish(&handler, &ctx, BufferedResponse::new(), Err(err.into())),
                Err(panic) => {
                    let fault = Fault::from_panic(panic);
                    return finish(&handler, &ctx, BufferedResponse::new(), Err(fault));
                }
            };

            let (mut parts, body) = response.into_parts();

            if let Some(RaisedFault(fault)) = parts.extensions.remove::<RaisedFault>() {
                return finish(&handler, &ctx, BufferedResponse::from_parts(parts), Err(fault));
            }

            if let Some(PendingResult(result)) = parts.extensions.remove::<PendingResult>() {
                return match interceptor.on_result_executing(&ctx, result).render() {
                    Ok(rendered) => {
                        let (rendered_parts, rendered_body) = rendered.into_parts();
                        parts.status = rendered_parts.status;
                        parts.headers.extend(rendered_parts.headers);
                        Ok(Response::from_parts(parts, rendered_body))
                    }
                    Err(fault) => finish(&handler, &ctx, BufferedResponse::from_parts(parts), Err(fault)),
                };
            }

            if is_empty_problem(&parts, &body) {
                return finish(&handler, &ctx, BufferedResponse::from_parts(parts), Ok(()));
            }

            Ok(Response::from_parts(parts, Body::new(body)))
        })
    }
}

fn is_empty_problem<B: HttpBody>(parts: &http::response::Parts, body: &B) -> bool {
    parts.status.is_problem()
        && body.size_hint().exact() == Some(0)
        && !parts.headers.contains_key(header::CONTENT_TYPE)
}

fn finish(
    handler: &ProblemDetailsHandler,
    ctx: &RequestContext,
    mut sink: BufferedResponse,
    outcome: Result<(), Fault>,
) -> Result<Response<Body>, Fault> {
    handler.complete(ctx, &mut sink, outcome)?;
    Ok(sink.into_response())
}
