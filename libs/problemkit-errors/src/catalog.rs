//! Client error catalog: title and type link for every problem status

use std::collections::BTreeMap;

use http::StatusCode;

use crate::problem::Problem;
use crate::status::{PROBLEM_STATUS_MAX, PROBLEM_STATUS_MIN, StatusCodeExt};

/// Default base of the generated problem type links.
pub const DEFAULT_TYPE_URI_BASE: &str = "https://httpstatuscodes.io";

/// Default problem type link for a status.
#[must_use]
pub fn default_type_uri(status: StatusCode) -> String {
    format!("{DEFAULT_TYPE_URI_BASE}/{}", status.as_u16())
}

/// Title and type link used for problems of one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientErrorData {
    pub title: &'static str,
    pub link: String,
}

impl ClientErrorData {
    /// Convert this entry into a Problem for the given status
    #[inline]
    pub fn as_problem(&self, status: StatusCode) -> Problem {
        Problem::new(status, self.title).with_type(self.link.clone())
    }
}

/// Catalog of [`ClientErrorData`] for every status in the problem range.
#[derive(Debug, Clone)]
pub struct ClientErrorMapping {
    entries: BTreeMap<u16, ClientErrorData>,
}

impl ClientErrorMapping {
    /// Build the catalog, generating each type link with `link`.
    #[must_use]
    pub fn new(link: impl Fn(StatusCode) -> String) -> Self {
        let entries = (PROBLEM_STATUS_MIN..=PROBLEM_STATUS_MAX)
            .filter_map(|code| StatusCode::from_u16(code).ok())
            .map(|status| {
                let data = ClientErrorData {
                    title: status.problem_title(),
                    link: link(status),
                };
                (status.as_u16(), data)
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, status: StatusCode) -> Option<&ClientErrorData> {
        self.entries.get(&status.as_u16())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ClientErrorMapping {
    fn default() -> Self {
        Self::new(default_type_uri)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_whole_problem_range() {
        let mapping = ClientErrorMapping::default();
        assert_eq!(mapping.len(), 200);
        assert!(mapping.get(StatusCode::OK).is_none());
    }

    #[test]
    fn entry_to_problem_works() {
        let mapping = ClientErrorMapping::new(|status| format!("https://errors.example.com/{status}"));
        let data = mapping.get(StatusCode::NOT_FOUND).unwrap();

        let problem = data.as_problem(StatusCode::NOT_FOUND);
        assert_eq!(problem.status, StatusCode::NOT_FOUND);
        assert_eq!(problem.title, "Not Found");
        assert_eq!(problem.type_url, "https://errors.example.com/404 Not Found");
    }

    #[test]
    fn default_links_point_at_status_reference() {
        let mapping = ClientErrorMapping::default();
        let data = mapping.get(StatusCode::NOT_IMPLEMENTED).unwrap();
        assert_eq!(data.link, "https://httpstatuscodes.io/501");
        assert_eq!(data.title, "Not Implemented");
    }
}
