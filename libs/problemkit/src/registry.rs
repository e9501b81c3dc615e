//! Ordered, predicate-driven mapping from faults to status codes and payloads
//!
//! The registry is assembled once with [`RegistryBuilder`] and is read-only
//! afterwards, so a single instance can be shared by every request.
//!
//! Mapping callbacks are arbitrary caller code. A callback that returns an error
//! or panics is skipped and evaluation continues with the next rule, so one broken
//! rule never takes the whole mapping down.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use http::StatusCode;
use problemkit_errors::{Category, Fault, Problem, categories};

use crate::context::RequestContext;
use crate::factory::ProblemDetailsFactory;

pub type Guard = Box<dyn Fn(&RequestContext, &Fault) -> bool + Send + Sync>;
pub type StatusResolver =
    Box<dyn Fn(&RequestContext, &Fault) -> anyhow::Result<StatusCode> + Send + Sync>;
pub type PayloadBuilder = Box<
    dyn Fn(&RequestContext, &Fault, StatusCode, &dyn ProblemDetailsFactory) -> anyhow::Result<Problem>
        + Send
        + Sync,
>;
pub type RethrowPredicate = Box<dyn Fn(&RequestContext, &Fault) -> bool + Send + Sync>;

/// One mapping: category, guard, status resolver and optional payload builder.
pub struct Rule {
    category: &'static Category,
    guard: Guard,
    status: StatusResolver,
    payload: Option<PayloadBuilder>,
}

impl Rule {
    #[must_use]
    pub fn new(
        category: &'static Category,
        guard: impl Fn(&RequestContext, &Fault) -> bool + Send + Sync + 'static,
        status: impl Fn(&RequestContext, &Fault) -> anyhow::Result<StatusCode> + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            guard: Box::new(guard),
            status: Box::new(status),
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(
        mut self,
        payload: impl Fn(&RequestContext, &Fault, StatusCode, &dyn ProblemDetailsFactory) -> anyhow::Result<Problem>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    #[must_use]
    pub fn category(&self) -> &'static Category {
        self.category
    }

    fn matches(&self, ctx: &RequestContext, fault: &Fault) -> bool {
        if !fault.is_a(self.category) {
            return false;
        }
        invoke(self.category, "guard", || (self.guard)(ctx, fault)).unwrap_or(false)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("category", &self.category)
            .field("has_payload", &self.payload.is_some())
            .finish_non_exhaustive()
    }
}

/// Run a caller callback, turning a panic into `None`.
fn invoke<T>(category: &Category, callback: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    if let Ok(value) = catch_unwind(AssertUnwindSafe(f)) {
        Some(value)
    } else {
        tracing::debug!(category = %category, callback, "mapping callback panicked; rule skipped");
        None
    }
}

/// Immutable rule set consulted by the payload factory and the pipeline.
pub struct RuleRegistry {
    rules: Vec<Rule>,
    rethrows: Vec<RethrowPredicate>,
}

impl RuleRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolve the status of `fault` with the first matching rule.
    ///
    /// A rule whose resolver fails is skipped and the next rule is tried.
    #[must_use]
    pub fn resolve_status(&self, ctx: &RequestContext, fault: &Fault) -> Option<StatusCode> {
        for rule in &self.rules {
            if !rule.matches(ctx, fault) {
                continue;
            }
            match invoke(rule.category, "status", || (rule.status)(ctx, fault)) {
                Some(Ok(status)) => return Some(status),
                Some(Err(error)) => {
                    tracing::debug!(category = %rule.category, error = %error, "status resolver failed; rule skipped");
                }
                None => {}
            }
        }
        None
    }

    /// Build a custom payload for `fault` with the first matching rule.
    ///
    /// Returns `None` when the first matching rule has no payload builder, so the
    /// caller falls back to the baseline payload for `status`.
    #[must_use]
    pub fn resolve_payload(
        &self,
        ctx: &RequestContext,
        fault: &Fault,
        status: StatusCode,
        factory: &dyn ProblemDetailsFactory,
    ) -> Option<Problem> {
        for rule in &self.rules {
            if !rule.matches(ctx, fault) {
                continue;
            }
            let builder = rule.payload.as_ref()?;
            match invoke(rule.category, "payload", || builder(ctx, fault, status, factory)) {
                Some(Ok(problem)) => return Some(problem),
                Some(Err(error)) => {
                    tracing::debug!(category = %rule.category, error = %error, "payload builder failed; rule skipped");
                }
                None => {}
            }
        }
        None
    }

    /// Returns `true` if the first rethrow predicate that accepts `fault` exists.
    #[must_use]
    pub fn should_rethrow(&self, ctx: &RequestContext, fault: &Fault) -> bool {
        self.rethrows.iter().any(|predicate| predicate(ctx, fault))
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn rethrow_count(&self) -> usize {
        self.rethrows.len()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules)
            .field("rethrows", &self.rethrows.len())
            .finish()
    }
}

/// Builder for [`RuleRegistry`]. Registration order is evaluation order.
#[derive(Default)]
#[must_use]
pub struct RegistryBuilder {
    rules: Vec<Rule>,
    rethrows: Vec<RethrowPredicate>,
}

impl RegistryBuilder {
    /// Map every fault of `category` to `status`.
    pub fn map_status(self, category: &'static Category, status: StatusCode) -> Self {
        self.add_rule(Rule::new(category, |_, _| true, move |_, _| Ok(status)))
    }

    /// Map every fault of `category` to `status` with a custom payload.
    pub fn map_status_with(
        self,
        category: &'static Category,
        status: StatusCode,
        payload: impl Fn(&RequestContext, &Fault, StatusCode, &dyn ProblemDetailsFactory) -> anyhow::Result<Problem>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.add_rule(Rule::new(category, |_, _| true, move |_, _| Ok(status)).with_payload(payload))
    }

    /// Map faults of `category` accepted by `guard` with a computed status.
    pub fn map(
        self,
        category: &'static Category,
        guard: impl Fn(&RequestContext, &Fault) -> bool + Send + Sync + 'static,
        status: impl Fn(&RequestContext, &Fault) -> anyhow::Result<StatusCode> + Send + Sync + 'static,
    ) -> Self {
        self.add_rule(Rule::new(category, guard, status))
    }

    pub fn add_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Let every fault of `category` propagate after the payload is written.
    pub fn rethrow(self, category: &'static Category) -> Self {
        self.rethrow_if(category, |_, _| true)
    }

    /// Let faults of `category` accepted by `predicate` propagate.
    pub fn rethrow_if(
        self,
        category: &'static Category,
        predicate: impl Fn(&RequestContext, &Fault) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.add_rethrow(move |ctx, fault| fault.is_a(category) && predicate(ctx, fault))
    }

    /// Ignore faults of `category`: they always propagate.
    pub fn ignore(self, category: &'static Category) -> Self {
        self.rethrow(category)
    }

    /// Drop every registered rethrow predicate and rethrow all faults.
    pub fn rethrow_all(mut self) -> Self {
        self.rethrows.clear();
        self.add_rethrow(|_, _| true)
    }

    pub fn add_rethrow(
        mut self,
        predicate: impl Fn(&RequestContext, &Fault) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rethrows.push(Box::new(predicate));
        self
    }

    /// Freeze the rule set.
    ///
    /// Appends a fallback mapping every fault to 500 unless a rule for the root
    /// category was registered.
    #[must_use]
    pub fn build(self) -> RuleRegistry {
        let has_fallback = self
            .rules
            .iter()
            .any(|rule| *rule.category == categories::ANY);
        let builder = if has_fallback {
            self
        } else {
            self.map_status(&categories::ANY, StatusCode::INTERNAL_SERVER_ERROR)
        };
        RuleRegistry {
            rules: builder.rules,
            rethrows: builder.rethrows,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::factory::DefaultProblemFactory;
    use http::{Method, Uri};
    use problemkit_errors::categories::{
        ANY, ARGUMENT, ARGUMENT_NULL, ARITHMETIC, DIVIDE_BY_ZERO, INVALID_OPERATION, IO,
        NOT_IMPLEMENTED,
    };

    static BILLING_IO: Category = Category::new("Io", &ANY);
    static SHADOW_ROOT: Category = Category::root("Fault");

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, Uri::from_static("/test"))
    }

    #[test]
    fn fallback_is_synthesized_when_missing() {
        let registry = RuleRegistry::builder().build();
        assert_eq!(registry.rules().len(), 1);

        let fault = Fault::new(&NOT_IMPLEMENTED, "nope");
        assert_eq!(
            registry.resolve_status(&ctx(), &fault),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn explicit_root_rule_suppresses_fallback() {
        let registry = RuleRegistry::builder()
            .map_status(&ANY, StatusCode::SERVICE_UNAVAILABLE)
            .build();
        assert_eq!(registry.rules().len(), 1);

        let fault = Fault::new(&ARITHMETIC, "overflow");
        assert_eq!(
            registry.resolve_status(&ctx(), &fault),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn same_named_category_does_not_match_rule() {
        let registry = RuleRegistry::builder()
            .map_status(&IO, StatusCode::SERVICE_UNAVAILABLE)
            .build();

        let fault = Fault::new(&BILLING_IO, "ledger offline");
        assert_eq!(
            registry.resolve_status(&ctx(), &fault),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn unrelated_root_named_like_any_keeps_fallback() {
        let registry = RuleRegistry::builder()
            .map_status(&SHADOW_ROOT, StatusCode::IM_A_TEAPOT)
            .build();
        assert_eq!(registry.rules().len(), 2);

        let fault = Fault::new(&IO, "disk");
        assert_eq!(
            registry.resolve_status(&ctx(), &fault),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn first_matching_rule_wins_over_broader_and_later_rules() {
        let registry = RuleRegistry::builder()
            .map_status(&ARGUMENT_NULL, StatusCode::BAD_REQUEST)
            .map_status(&ARGUMENT, StatusCode::UNPROCESSABLE_ENTITY)
            .map_status(&ARGUMENT_NULL, StatusCode::CONFLICT)
            .build();

        let null = Fault::new(&ARGUMENT_NULL, "missing");
        assert_eq!(registry.resolve_status(&ctx(), &null), Some(StatusCode::BAD_REQUEST));

        let arg = Fault::new(&ARGUMENT, "bad");
        assert_eq!(
            registry.resolve_status(&ctx(), &arg),
            Some(StatusCode::UNPROCESSABLE_ENTITY)
        );
    }

    #[test]
    fn broader_rule_registered_first_shadows_narrower_one() {
        let registry = RuleRegistry::builder()
            .map_status(&ARITHMETIC, StatusCode::BAD_REQUEST)
            .map_status(&DIVIDE_BY_ZERO, StatusCode::CONFLICT)
            .build();

        let fault = Fault::new(&DIVIDE_BY_ZERO, "div");
        assert_eq!(registry.resolve_status(&ctx(), &fault), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn guard_rejection_falls_through_to_next_rule() {
        let registry = RuleRegistry::builder()
            .map(
                &INVALID_OPERATION,
                |ctx, _| ctx.path() == "/admin",
                |_, _| Ok(StatusCode::FORBIDDEN),
            )
            .map_status(&INVALID_OPERATION, StatusCode::METHOD_NOT_ALLOWED)
            .build();

        let fault = Fault::new(&INVALID_OPERATION, "nope");
        assert_eq!(
            registry.resolve_status(&ctx(), &fault),
            Some(StatusCode::METHOD_NOT_ALLOWED)
        );

        let admin = RequestContext::new(Method::GET, Uri::from_static("/admin"));
        assert_eq!(registry.resolve_status(&admin, &fault), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn failing_resolver_is_skipped() {
        let registry = RuleRegistry::builder()
            .map(&ARITHMETIC, |_, _| true, |_, _| anyhow::bail!("broken rule"))
            .map(&ARITHMETIC, |_, _| true, |_, _| panic!("panicking rule"))
            .map_status(&ARITHMETIC, StatusCode::BAD_REQUEST)
            .build();

        let fault = Fault::new(&ARITHMETIC, "overflow");
        assert_eq!(registry.resolve_status(&ctx(), &fault), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn panicking_guard_is_treated_as_no_match() {
        let registry = RuleRegistry::builder()
            .map(&ANY, |_, _| panic!("guard blew up"), |_, _| Ok(StatusCode::IM_A_TEAPOT))
            .map_status(&ANY, StatusCode::BAD_GATEWAY)
            .build();

        let fault = Fault::new(&ARITHMETIC, "overflow");
        assert_eq!(registry.resolve_status(&ctx(), &fault), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn all_resolvers_failing_yields_none() {
        let registry = RuleRegistry::builder()
            .map(&ANY, |_, _| true, |_, _| anyhow::bail!("always broken"))
            .build();

        let fault = Fault::new(&ARITHMETIC, "overflow");
        assert_eq!(registry.resolve_status(&ctx(), &fault), None);
    }

    #[test]
    fn payload_builder_of_first_match_is_used() {
        let factory = DefaultProblemFactory::default();
        let registry = RuleRegistry::builder()
            .map_status_with(&ARITHMETIC, StatusCode::BAD_REQUEST, |ctx, fault, status, factory| {
                Ok(factory
                    .create_problem(ctx, status, None)
                    .with_detail(format!("custom: {}", fault.message())))
            })
            .build();

        let fault = Fault::new(&DIVIDE_BY_ZERO, "div");
        let problem = registry
            .resolve_payload(&ctx(), &fault, StatusCode::BAD_REQUEST, &factory)
            .unwrap();
        assert_eq!(problem.detail.as_deref(), Some("custom: div"));
        assert_eq!(problem.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn failing_payload_builder_continues_to_next_rule() {
        let factory = DefaultProblemFactory::default();
        let registry = RuleRegistry::builder()
            .map_status_with(&ARITHMETIC, StatusCode::BAD_REQUEST, |_, _, _, _| {
                anyhow::bail!("builder broken")
            })
            .map_status_with(&ANY, StatusCode::BAD_REQUEST, |_, _, status, _| {
                Ok(Problem::new(status, "second"))
            })
            .build();

        let fault = Fault::new(&ARITHMETIC, "overflow");
        let problem = registry
            .resolve_payload(&ctx(), &fault, StatusCode::BAD_REQUEST, &factory)
            .unwrap();
        assert_eq!(problem.title, "second");
    }

    #[test]
    fn first_match_without_builder_yields_no_payload() {
        let factory = DefaultProblemFactory::default();
        let registry = RuleRegistry::builder()
            .map_status(&ARITHMETIC, StatusCode::BAD_REQUEST)
            .map_status_with(&ANY, StatusCode::BAD_REQUEST, |_, _, status, _| {
                Ok(Problem::new(status, "unreachable"))
            })
            .build();

        let fault = Fault::new(&ARITHMETIC, "overflow");
        assert!(
            registry
                .resolve_payload(&ctx(), &fault, StatusCode::BAD_REQUEST, &factory)
                .is_none()
        );
    }

    #[test]
    fn rethrow_respects_category_and_predicate() {
        let registry = RuleRegistry::builder()
            .rethrow(&ARITHMETIC)
            .rethrow_if(&ARGUMENT, |ctx, _| ctx.path() == "/test")
            .build();

        assert!(registry.should_rethrow(&ctx(), &Fault::new(&DIVIDE_BY_ZERO, "div")));
        assert!(registry.should_rethrow(&ctx(), &Fault::new(&ARGUMENT_NULL, "null")));
        assert!(!registry.should_rethrow(&ctx(), &Fault::new(&NOT_IMPLEMENTED, "todo")));

        let other = RequestContext::new(Method::GET, Uri::from_static("/other"));
        assert!(!registry.should_rethrow(&other, &Fault::new(&ARGUMENT, "arg")));
    }

    #[test]
    fn empty_rethrow_list_never_rethrows() {
        let registry = RuleRegistry::builder().build();
        assert!(!registry.should_rethrow(&ctx(), &Fault::new(&ANY, "x")));
    }

    #[test]
    fn rethrow_all_replaces_previous_predicates() {
        let registry = RuleRegistry::builder()
            .rethrow(&ARITHMETIC)
            .ignore(&NOT_IMPLEMENTED)
            .rethrow_all()
            .build();

        assert_eq!(registry.rethrow_count(), 1);
        assert!(registry.should_rethrow(&ctx(), &Fault::new(&INVALID_OPERATION, "any")));
    }

    #[test]
    fn rethrow_predicates_short_circuit_in_order() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = RuleRegistry::builder()
            .add_rethrow(|_, _| true)
            .add_rethrow(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .build();

        assert!(registry.should_rethrow(&ctx(), &Fault::new(&ANY, "x")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
