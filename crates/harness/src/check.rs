//! Checks
//!
//! A check is a named predicate over a [`RequestResult`]. Evaluation is
//! total: a predicate that returns an error, or panics, counts as a failed
//! check and the virtual user carries on.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::executor::RequestResult;
use crate::metrics::{builtin, MetricError, MetricKind, MetricRegistry};

/// Why a predicate could not produce a verdict
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The result has no body (transport failure)
    #[error("response has no body")]
    MissingBody,

    #[error("{0}")]
    Predicate(String),
}

type Predicate = dyn Fn(&RequestResult) -> Result<bool, CheckError> + Send + Sync;

/// Named predicate over a request result
#[derive(Clone)]
pub struct Check {
    name: String,
    predicate: Arc<Predicate>,
}

impl Check {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&RequestResult) -> Result<bool, CheckError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// `status == expected`
    pub fn status(expected: u16) -> Self {
        Self::new(format!("status is {}", expected), move |r| {
            Ok(r.status == expected)
        })
    }

    /// Body contains `needle`; fails on a missing body
    pub fn body_contains(name: impl Into<String>, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(name, move |r| Ok(body(r)?.contains(needle.as_str())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate and record this check
    pub fn run(
        &self,
        registry: &MetricRegistry,
        result: &RequestResult,
    ) -> Result<bool, MetricError> {
        run_check(registry, &self.name, &*self.predicate, result)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Response body, or [`CheckError::MissingBody`]
pub fn body(result: &RequestResult) -> Result<&str, CheckError> {
    result.body.as_deref().ok_or(CheckError::MissingBody)
}

/// Evaluate `predicate` against `result` and record the outcome
///
/// Appends a boolean sample to the `checks` rate, tagged with the check name
/// and the request's tags, and updates the per-check breakdown. Only a
/// metric integrity error is returned.
pub fn run_check<F>(
    registry: &MetricRegistry,
    name: &str,
    predicate: F,
    result: &RequestResult,
) -> Result<bool, MetricError>
where
    F: Fn(&RequestResult) -> Result<bool, CheckError>,
{
    let passed = match panic::catch_unwind(AssertUnwindSafe(|| predicate(result))) {
        Ok(Ok(passed)) => passed,
        Ok(Err(error)) => {
            debug!(check = %name, error = %error, "Check predicate errored");
            false
        }
        Err(payload) => {
            warn!(check = %name, panic = %panic_message(&*payload), "Check predicate panicked");
            false
        }
    };

    let mut tags = result.tags.clone();
    tags.insert("check".to_string(), name.to_string());
    registry.record_tagged(builtin::CHECKS, MetricKind::Rate, passed, &tags)?;
    registry.record_check(name, passed);

    Ok(passed)
}

/// Run every check (no short circuit); true when all passed
pub fn check_all(
    registry: &MetricRegistry,
    result: &RequestResult,
    checks: &[Check],
) -> Result<bool, MetricError> {
    let mut all = true;
    for check in checks {
        all &= check.run(registry, result)?;
    }
    Ok(all)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
