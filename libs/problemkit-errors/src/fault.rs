//! Fault model: a polymorphic error value with a static category hierarchy
//!
//! A [`Fault`] carries a [`Category`]. Categories form a tree rooted at
//! [`categories::ANY`]; a fault *is a* category when its own category or any
//! ancestor is that very category. Identity is the static's address, so two
//! categories sharing a name stay distinct. Mapping rules use this to match a whole family
//! of faults with a single registration.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A node in the fault category tree.
///
/// Declare application categories as statics so they can be referenced from
/// other categories and from rules:
///
/// ```
/// use problemkit_errors::{Category, categories};
///
/// static STORAGE: Category = Category::new("Storage", &categories::IO);
/// static QUOTA: Category = Category::new("QuotaExceeded", &STORAGE);
///
/// assert!(QUOTA.is_a(&categories::IO));
/// assert!(!categories::IO.is_a(&QUOTA));
/// ```
pub struct Category {
    name: &'static str,
    parent: Option<&'static Category>,
}

impl Category {
    /// Create a root category with no parent.
    #[must_use]
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Create a sub-category of `parent`.
    #[must_use]
    pub const fn new(name: &'static str, parent: &'static Category) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn parent(&self) -> Option<&'static Category> {
        self.parent
    }

    /// Returns `true` if `self` is `other` or one of its descendants.
    #[must_use]
    pub fn is_a(&self, other: &Category) -> bool {
        std::iter::successors(Some(self), |category| category.parent)
            .any(|category| std::ptr::eq(category, other))
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Category {}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Built-in fault categories.
pub mod categories {
    use super::Category;

    /// Root of the hierarchy; every fault is an `ANY`.
    pub static ANY: Category = Category::root("Fault");

    pub static ARGUMENT: Category = Category::new("Argument", &ANY);
    pub static ARGUMENT_NULL: Category = Category::new("ArgumentNull", &ARGUMENT);
    pub static ARITHMETIC: Category = Category::new("Arithmetic", &ANY);
    pub static DIVIDE_BY_ZERO: Category = Category::new("DivideByZero", &ARITHMETIC);
    pub static INVALID_OPERATION: Category = Category::new("InvalidOperation", &ANY);
    pub static NOT_IMPLEMENTED: Category = Category::new("NotImplemented", &ANY);
    pub static NOT_SUPPORTED: Category = Category::new("NotSupported", &ANY);
    pub static IO: Category = Category::new("Io", &ANY);
    pub static TIMEOUT: Category = Category::new("Timeout", &ANY);
    pub static CANCELED: Category = Category::new("Canceled", &ANY);
    pub static VALIDATION: Category = Category::new("Validation", &ANY);

    /// A handler panicked; the panic payload becomes the message.
    pub static PANIC: Category = Category::new("Panic", &ANY);
}

/// A polymorphic error value raised while handling a request.
///
/// The cause chain is built once and shared through `Arc`, so a fault can never
/// reference itself.
#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    category: &'static Category,
    message: String,
    help_link: Option<String>,
    #[source]
    cause: Option<Arc<Fault>>,
    data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Fault {
    #[must_use]
    pub fn new(category: &'static Category, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            help_link: None,
            cause: None,
            data: None,
        }
    }

    /// Build a fault from any error, turning its `source()` chain into causes.
    #[must_use]
    pub fn from_error(
        category: &'static Category,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let cause = error
            .source()
            .map(|source| Arc::new(Self::from_error(&categories::ANY, source)));
        Self {
            cause,
            ..Self::new(category, error.to_string())
        }
    }

    /// Build a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self::new(&categories::PANIC, message)
    }

    #[must_use]
    pub fn with_help_link(mut self, link: impl Into<String>) -> Self {
        self.help_link = Some(link.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Fault) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach typed data that mapping callbacks can recover with [`Fault::data`].
    #[must_use]
    pub fn with_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    #[must_use]
    pub fn category(&self) -> &'static Category {
        self.category
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn help_link(&self) -> Option<&str> {
        self.help_link.as_deref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Fault> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|data| data.downcast_ref::<T>())
    }

    /// Shorthand for `self.category().is_a(category)`.
    #[must_use]
    pub fn is_a(&self, category: &Category) -> bool {
        self.category.is_a(category)
    }

    /// Iterate over this fault followed by its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Fault> {
        std::iter::successors(Some(self), |fault| fault.cause())
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("category", &self.category)
            .field("message", &self.message)
            .field("help_link", &self.help_link)
            .field("cause", &self.cause)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

impl From<anyhow::Error> for Fault {
    fn from(error: anyhow::Error) -> Self {
        let mut causes = error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>();
        let mut cause = None;
        while let Some(message) = causes.pop() {
            let mut fault = Self::new(&categories::ANY, message);
            fault.cause = cause.map(Arc::new);
            cause = Some(fault);
        }
        Self {
            cause: cause.map(Arc::new),
            ..Self::new(&categories::ANY, error.to_string())
        }
    }
}

impl From<std::io::Error> for Fault {
    fn from(error: std::io::Error) -> Self {
        Self::from_error(&categories::IO, &error)
    }
}

impl From<Infallible> for Fault {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Diagnostic view of a fault, recursively including its causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub message: String,
    #[serde(rename = "type")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_exception: Option<Box<ExceptionDetails>>,
}

impl From<&Fault> for ExceptionDetails {
    fn from(fault: &Fault) -> Self {
        Self {
            message: fault.message().to_owned(),
            category: fault.category().name().to_owned(),
            help_link: fault.help_link().map(ToOwned::to_owned),
            inner_exception: fault.cause().map(|cause| Box::new(Self::from(cause))),
        }
    }
}

/// Response extension marking a response produced by raising a fault.
///
/// The problem details service treats such a response as a propagated fault.
#[derive(Debug, Clone)]
pub struct RaisedFault(pub Fault);

/// Axum integration: returning `Err(fault)` from a handler raises it
#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Fault {
    fn into_response(self) -> axum::response::Response {
        let mut resp =
            axum::response::IntoResponse::into_response(http::StatusCode::INTERNAL_SERVER_ERROR);
        resp.extensions_mut().insert(RaisedFault(self));
        resp
    }
}
