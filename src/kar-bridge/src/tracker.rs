//! Progress Tracker
//!
//! Turns consecutive snapshots into checkbox ids to report, at most once per
//! run. The "already reported" memory is the run scope, which is replaced
//! on every run start.

use crate::session::RunScope;
use crate::state::GameState;
use tracing::info;

#[derive(Debug, Default)]
pub struct ProgressTracker;

impl ProgressTracker {
    pub fn new() -> Self {
        Self
    }

    /// Newly completed boxes between `previous` and `current`, ascending.
    ///
    /// Each id is returned only once for a given run scope.
    pub fn advance(
        &self,
        scope: &mut RunScope,
        previous: Option<&GameState>,
        current: &GameState,
    ) -> Vec<i64> {
        let mut fresh = Vec::new();
        for id in current
            .checklist
            .newly_completed(previous.map(|s| &s.checklist))
        {
            if scope.reported.insert(id) {
                info!(box_id = id, run = scope.index, "checkbox completed");
                fresh.push(id);
            }
        }
        fresh
    }
}
