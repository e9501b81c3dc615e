//! Core error types for problemkit
//!
//! This crate provides pure data types for Problem Details error handling, with no
//! dependencies on HTTP frameworks unless the `axum` feature is enabled. It includes:
//! - RFC 9457 Problem Details (`Problem`) and field validation errors
//! - The problem status classifier
//! - The fault model (`Fault`, `Category`) with a static category hierarchy
//! - The client error catalog (`ClientErrorMapping`)
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod fault;
pub mod problem;
pub mod status;

// Re-export commonly used types
pub use catalog::{ClientErrorData, ClientErrorMapping, default_type_uri};
pub use fault::{Category, ExceptionDetails, Fault, RaisedFault, categories};
pub use problem::{
    APPLICATION_PROBLEM_JSON, APPLICATION_PROBLEM_XML, ERRORS_EXTENSION, EXCEPTION_EXTENSION,
    PROBLEM_CONTENT_TYPES, Problem, TRACE_ID_EXTENSION, VALIDATION_TITLE, ValidationErrors,
};
pub use status::{StatusCodeExt, is_problem_status};
