#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Problem Details error mapping for tower and axum
//!
//! This crate turns faults raised while handling a request, and error responses
//! left without a body, into RFC 9457 problem details:
//! - An ordered rule registry maps fault categories to status codes and payloads
//! - Rethrow rules let selected faults keep propagating
//! - Exception details are added only where configured (development by default)
//! - Problem responses are never cached; CORS and auth challenge headers survive
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, error_handling::HandleErrorLayer, routing::get};
//! use problemkit::{ProblemDetailsLayer, ProblemDetailsOptions, RuleRegistry};
//! use problemkit_errors::{Fault, categories};
//!
//! let registry = RuleRegistry::builder()
//!     .map_status(&categories::NOT_IMPLEMENTED, http::StatusCode::NOT_IMPLEMENTED)
//!     .ignore(&categories::CANCELED)
//!     .build();
//! let options = Arc::new(ProblemDetailsOptions::builder(registry).build());
//!
//! let app = Router::new()
//!     .route("/", get(|| async { Err::<(), _>(Fault::new(&categories::NOT_IMPLEMENTED, "soon")) }))
//!     .layer(
//!         tower::ServiceBuilder::new()
//!             .layer(HandleErrorLayer::new(|fault: Fault| async move { fault.to_string() }))
//!             .layer(ProblemDetailsLayer::new(options)),
//!     );
//! ```

pub mod config;
pub mod context;
pub mod factory;
pub mod interceptor;
pub mod layer;
pub mod options;
pub mod pipeline;
pub mod registry;
pub mod response;

pub use config::{ConfigError, ProblemDetailsConfig};
pub use context::RequestContext;
pub use factory::{DefaultProblemFactory, ProblemDetailsFactory, ProblemFactory};
pub use interceptor::{ObjectResult, PendingResult, ResultInterceptor, ResultValue};
pub use layer::{ProblemDetailsLayer, ProblemDetailsService};
pub use options::{ProblemDetailsOptions, ProblemDetailsOptionsBuilder, RuntimeEnvironment};
pub use pipeline::{FinalizeError, ProblemDetailsHandler};
pub use registry::{RegistryBuilder, Rule, RuleRegistry};
pub use response::{BufferedResponse, ResponseSink, SinkError, prepare_response};

pub use problemkit_errors;
