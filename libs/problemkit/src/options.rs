//! Immutable options for the problem details engine
//!
//! Built once before serving starts and shared through `Arc`. There is no way to
//! change options after [`ProblemDetailsOptionsBuilder::build`].

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use problemkit_errors::{ClientErrorMapping, Fault, Problem, default_type_uri};
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::registry::RuleRegistry;

pub type FaultPredicate = Arc<dyn Fn(&RequestContext, &Fault) -> bool + Send + Sync>;
pub type LogPredicate = Arc<dyn Fn(&RequestContext, &Fault, &Problem) -> bool + Send + Sync>;
pub type TypeUriGenerator = Arc<dyn Fn(StatusCode) -> String + Send + Sync>;
pub type DiagnosticHook = Arc<dyn Fn(&RequestContext, &Fault) + Send + Sync>;

/// Runtime mode of the host application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEnvironment {
    Development,
    Staging,
    #[default]
    Production,
}

impl RuntimeEnvironment {
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

/// Engine options: rule registry plus the tunables consulted per request.
pub struct ProblemDetailsOptions {
    registry: RuleRegistry,
    environment: RuntimeEnvironment,
    include_exception_details: FaultPredicate,
    log_unhandled: LogPredicate,
    type_uri: TypeUriGenerator,
    on_handled_fault: Option<DiagnosticHook>,
}

impl ProblemDetailsOptions {
    #[must_use]
    pub fn builder(registry: RuleRegistry) -> ProblemDetailsOptionsBuilder {
        ProblemDetailsOptionsBuilder::new(registry)
    }

    #[must_use]
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn environment(&self) -> RuntimeEnvironment {
        self.environment
    }

    /// Whether fault diagnostics go into the payload for this request.
    #[must_use]
    pub fn include_exception_details(&self, ctx: &RequestContext, fault: &Fault) -> bool {
        (self.include_exception_details)(ctx, fault)
    }

    /// Whether a converted fault is logged as unhandled.
    #[must_use]
    pub fn log_unhandled(&self, ctx: &RequestContext, fault: &Fault, problem: &Problem) -> bool {
        (self.log_unhandled)(ctx, fault, problem)
    }

    #[must_use]
    pub fn type_uri(&self, status: StatusCode) -> String {
        (self.type_uri)(status)
    }

    /// Client error catalog using the configured type links.
    #[must_use]
    pub fn client_error_mapping(&self) -> ClientErrorMapping {
        ClientErrorMapping::new(|status| self.type_uri(status))
    }

    pub(crate) fn notify_handled(&self, ctx: &RequestContext, fault: &Fault) {
        if let Some(hook) = &self.on_handled_fault {
            hook(ctx, fault);
        }
    }
}

impl Default for ProblemDetailsOptions {
    fn default() -> Self {
        Self::builder(RuleRegistry::default()).build()
    }
}

impl fmt::Debug for ProblemDetailsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemDetailsOptions")
            .field("registry", &self.registry)
            .field("environment", &self.environment)
            .field("on_handled_fault", &self.on_handled_fault.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProblemDetailsOptions`].
///
/// Unset tunables get the defaults: exception details only in development,
/// log unhandled faults resolving to 5xx, type links to `httpstatuscodes.io`.
#[must_use]
pub struct ProblemDetailsOptionsBuilder {
    registry: RuleRegistry,
    environment: RuntimeEnvironment,
    include_exception_details: Option<FaultPredicate>,
    log_unhandled: Option<LogPredicate>,
    type_uri: Option<TypeUriGenerator>,
    on_handled_fault: Option<DiagnosticHook>,
}

impl ProblemDetailsOptionsBuilder {
    fn new(registry: RuleRegistry) -> Self {
        Self {
            registry,
            environment: RuntimeEnvironment::default(),
            include_exception_details: None,
            log_unhandled: None,
            type_uri: None,
            on_handled_fault: None,
        }
    }

    pub fn environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn include_exception_details(
        mut self,
        predicate: impl Fn(&RequestContext, &Fault) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.include_exception_details = Some(Arc::new(predicate));
        self
    }

    pub fn log_unhandled(
        mut self,
        predicate: impl Fn(&RequestContext, &Fault, &Problem) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.log_unhandled = Some(Arc::new(predicate));
        self
    }

    pub fn type_uri(mut self, generator: impl Fn(StatusCode) -> String + Send + Sync + 'static) -> Self {
        self.type_uri = Some(Arc::new(generator));
        self
    }

    /// Hook invoked with every fault converted into a written payload.
    pub fn on_handled_fault(
        mut self,
        hook: impl Fn(&RequestContext, &Fault) + Send + Sync + 'static,
    ) -> Self {
        self.on_handled_fault = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn build(self) -> ProblemDetailsOptions {
        let development = self.environment.is_development();
        ProblemDetailsOptions {
            registry: self.registry,
            environment: self.environment,
            include_exception_details: self
                .include_exception_details
                .unwrap_or_else(|| Arc::new(move |_, _| development)),
            log_unhandled: self
                .log_unhandled
                .unwrap_or_else(|| Arc::new(|_, _, problem| problem.status.as_u16() >= 500)),
            type_uri: self.type_uri.unwrap_or_else(|| Arc::new(default_type_uri)),
            on_handled_fault: self.on_handled_fault,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, Uri};
    use problemkit_errors::categories::ANY;

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, Uri::from_static("/"))
    }

    #[test]
    fn defaults_hide_details_outside_development() {
        let fault = Fault::new(&ANY, "x");

        let production = ProblemDetailsOptions::default();
        assert!(!production.include_exception_details(&ctx(), &fault));

        let development = ProblemDetailsOptions::builder(RuleRegistry::default())
            .environment(RuntimeEnvironment::Development)
            .build();
        assert!(development.include_exception_details(&ctx(), &fault));
    }

    #[test]
    fn default_log_predicate_only_logs_server_errors() {
        let options = ProblemDetailsOptions::default();
        let fault = Fault::new(&ANY, "x");

        let server = Problem::from_status(StatusCode::BAD_GATEWAY);
        let client = Problem::from_status(StatusCode::NOT_FOUND);
        assert!(options.log_unhandled(&ctx(), &fault, &server));
        assert!(!options.log_unhandled(&ctx(), &fault, &client));

        let beyond = StatusCode::from_u16(600).unwrap();
        assert!(options.log_unhandled(&ctx(), &fault, &Problem::from_status(beyond)));
    }

    #[test]
    fn custom_type_uri_feeds_catalog() {
        let options = ProblemDetailsOptions::builder(RuleRegistry::default())
            .type_uri(|status| format!("https://errors.example.com/{}", status.as_u16()))
            .build();

        let mapping = options.client_error_mapping();
        assert_eq!(
            mapping.get(StatusCode::CONFLICT).map(|d| d.link.as_str()),
            Some("https://errors.example.com/409")
        );
    }

    #[test]
    fn diagnostic_hook_is_optional() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fault = Fault::new(&ANY, "x");
        ProblemDetailsOptions::default().notify_handled(&ctx(), &fault);

        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let options = ProblemDetailsOptions::builder(RuleRegistry::default())
            .on_handled_fault(move |_, _| flag.store(true, Ordering::SeqCst))
            .build();
        options.notify_handled(&ctx(), &fault);
        assert!(seen.load(Ordering::SeqCst));
    }
}
