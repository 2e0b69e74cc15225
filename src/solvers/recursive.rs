//! Computing a process together with whatever its results make solvable.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{SolveOutcome, Underdetermination};
use crate::system::{MfaSystem, ProcessId};
use crate::{MfaError, MfaResult};

impl MfaSystem {
    /// Computes process `name`, then keeps computing neighbors of computed
    /// processes until no further process can be solved.
    ///
    /// The start process is subject to the `underdetermined` error behavior.
    /// Neighbors that stay underdetermined are reported through the
    /// `underdetermined_neighbors` behavior and returned.
    pub fn compute_recursive(&mut self, name: &str) -> MfaResult<Vec<Underdetermination>> {
        if let SolveOutcome::Underdetermined(missing) = self.compute_process(name)? {
            return Ok(vec![missing]);
        }
        let start = self.process_id(name)?;
        let mut pending = self.uncomputed_neighbors(start);
        let mut left = Vec::new();

        loop {
            let mut progressed = false;
            left.clear();
            for id in std::mem::take(&mut pending) {
                let neighbor = self.processes[id.0].name().to_string();
                match self.solve_process(&neighbor)? {
                    SolveOutcome::Computed { .. } => {
                        progressed = true;
                        pending.extend(self.uncomputed_neighbors(id));
                    }
                    SolveOutcome::Underdetermined(missing) => {
                        pending.insert(id);
                        left.push(missing);
                    }
                }
            }
            if !progressed || pending.is_empty() {
                break;
            }
            pending.retain(|id| !self.processes[id.0].is_computed());
        }

        for missing in &left {
            self.config
                .error_behaviors
                .underdetermined_neighbors
                .handle(MfaError::Underdetermined(missing.clone()))?;
        }
        if left.is_empty() {
            debug!(process = %name, "recursive computation complete");
        } else {
            info!(
                process = %name,
                remaining = left.len(),
                "recursive computation stopped at underdetermined processes"
            );
        }
        Ok(left)
    }

    /// Non-boundary processes adjacent to `id` that are not computed yet.
    fn uncomputed_neighbors(&self, id: ProcessId) -> BTreeSet<ProcessId> {
        self.flows
            .values()
            .filter_map(|flow| {
                if flow.from_id() == id {
                    Some(flow.to_id())
                } else if flow.to_id() == id {
                    Some(flow.from_id())
                } else {
                    None
                }
            })
            .filter(|other| {
                let process = &self.processes[other.0];
                !process.is_boundary() && !process.is_computed()
            })
            .collect()
    }
}
