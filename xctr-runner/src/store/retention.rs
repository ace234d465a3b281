// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunQuery, RunStore};
use crate::errors::RunStoreError;
use tracing::info;
use xctr_metadata::{RunId, RunRecord, RunStatus};

/// A retention policy for stored runs.
///
/// Runs are evaluated newest first (by `started_at`). A run is kept while
/// fewer than `max_count` runs have been kept. Runs that are still `running`
/// are always kept, and count toward the limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of runs to keep. `None` keeps everything.
    pub max_count: Option<usize>,
}

impl RetentionPolicy {
    /// Creates a policy from the `store.retain-last-runs` setting, where 0
    /// disables pruning.
    pub fn from_retain_last_runs(retain_last_runs: usize) -> Self {
        Self {
            max_count: (retain_last_runs > 0).then_some(retain_last_runs),
        }
    }

    /// Computes which runs should be deleted, oldest last.
    pub fn compute_runs_to_delete(&self, runs: &[RunRecord]) -> Vec<RunId> {
        let Some(max_count) = self.max_count else {
            return Vec::new();
        };

        let mut sorted_runs: Vec<_> = runs.iter().collect();
        sorted_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let mut to_delete = Vec::new();
        let mut kept_count = 0usize;
        for run in sorted_runs {
            if run.status == RunStatus::Running || kept_count < max_count {
                kept_count += 1;
            } else {
                to_delete.push(run.id.clone());
            }
        }
        to_delete
    }

    /// Deletes every run in `store` that this policy does not keep.
    ///
    /// Returns the ids of the deleted runs.
    pub fn prune<S: RunStore + ?Sized>(&self, store: &S) -> Result<Vec<RunId>, RunStoreError> {
        if self.max_count.is_none() {
            return Ok(Vec::new());
        }
        let runs = store.runs(&RunQuery::all())?;
        let to_delete = self.compute_runs_to_delete(&runs);
        if !to_delete.is_empty() {
            store.delete_runs(&to_delete)?;
            info!(
                "pruned {} old runs (keeping the last {})",
                to_delete.len(),
                self.max_count.unwrap_or_default(),
            );
        }
        Ok(to_delete)
    }
}
