//! Outcome of a whole pass, merged from several object sets.

use std::time::Duration;

use crate::ReconcileError;

/// What the outer scheduler should do next.
#[derive(Debug, Default)]
pub struct PassResult {
    /// Recheck after this long even if nothing changes.
    pub requeue_after: Option<Duration>,
    pub error: Option<PassError>,
}

impl PassResult {
    pub fn is_ok(&self) -> bool { self.error.is_none() }
}

#[derive(Debug, thiserror::Error)]
#[error("{}", join(.errors))]
pub struct PassError {
    pub errors: Vec<ReconcileError>,
}

fn join(errors: &[ReconcileError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Default)]
pub struct Builder {
    requeue_after: Option<Duration>,
    errors: Vec<ReconcileError>,
}

impl Builder {
    pub fn new() -> Self { Self::default() }

    /// Keep the earliest requested recheck.
    pub fn requeue_after(&mut self, d: Duration) -> &mut Self {
        self.requeue_after = Some(self.requeue_after.map_or(d, |cur| cur.min(d)));
        self
    }

    pub fn error(&mut self, e: ReconcileError) -> &mut Self {
        self.errors.push(e);
        self
    }

    /// Record an object set's errors, if any.
    pub fn merge(&mut self, r: Result<(), ReconcileError>) -> &mut Self {
        if let Err(e) = r {
            self.errors.push(e);
        }
        self
    }

    pub fn result(self) -> PassResult {
        let error = (!self.errors.is_empty()).then_some(PassError { errors: self.errors });
        PassResult { requeue_after: self.requeue_after, error }
    }
}
