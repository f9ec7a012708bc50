//! Walks a resolved path against the running process instance.
//!
//! For every activity the caller's `apply` callback runs first, so handlers
//! (and call activity stubs registered by it) act before anything is
//! asserted. Afterwards:
//!
//! - a preceding event-based gateway must have been passed,
//! - an event-based gateway must be waiting,
//! - an activity with a successor, or the final activity when the path
//!   passes through its end, must have been passed,
//! - otherwise the instance must be waiting at the activity.

use tracing::debug;

use crate::{model::PathActivity, workflow::runner::ExecutionCoordinator};

use super::types::ApplyError;

/// How the final activity of a path is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEnd {
    /// The instance must be waiting at the final activity.
    WaitState,
    /// The final activity must have been passed, e.g. a process end event.
    PassThrough,
}

impl From<bool> for PathEnd {
    /// `true` when the path ends the process.
    fn from(process_end: bool) -> Self {
        if process_end { PathEnd::PassThrough } else { PathEnd::WaitState }
    }
}

impl ExecutionCoordinator {
    /// Applies and verifies `activities` in order.
    ///
    /// Scopes are asserted through their multi-instance body; iterate their
    /// children from a [`ScopeLoopDriver`](super::repeat::ScopeLoopDriver)
    /// step by calling this method again with the scope's children.
    pub fn execute_path<F>(&mut self, activities: &[PathActivity], end: PathEnd, mut apply: F) -> Result<(), ApplyError>
    where
        F: FnMut(&mut ExecutionCoordinator, &PathActivity) -> Result<(), ApplyError>,
    {
        let mut previous: Option<&PathActivity> = None;

        for (index, activity) in activities.iter().enumerate() {
            debug!(activity_id = %activity.id, index, "executing path activity");
            apply(self, activity)?;

            if let Some(previous) = previous
                && previous.is_event_based_gateway()
            {
                self.assert_has_passed(&previous.runtime_id())?;
            }

            let has_next = index + 1 < activities.len();
            let runtime_id = activity.runtime_id();
            if activity.is_event_based_gateway() {
                self.assert_waiting_at(&runtime_id)?;
            } else if has_next || end == PathEnd::PassThrough {
                self.assert_has_passed(&runtime_id)?;
            } else {
                self.assert_waiting_at(&runtime_id)?;
            }

            previous = Some(activity);
        }

        Ok(())
    }
}
