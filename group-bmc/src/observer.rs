//! Hooks to watch the VB iteration as it runs.

use crate::common::*;
use crate::engine::BmcOutput;

/// State of the variational posterior after one iteration
#[derive(Debug, Clone, Copy)]
pub struct IterationSnapshot<'a> {
    /// 1-based iteration count
    pub iteration: usize,
    pub free_energy: f64,
    /// Change of the Free Energy from the previous iteration
    pub delta: f64,
    /// Dirichlet concentrations
    pub a: &'a DVec,
    /// K x n attributions
    pub r: &'a Mat,
    /// Posterior mean frequencies
    pub ef: &'a DVec,
}

/// Receives every VB iteration, then the final output.
pub trait ProgressObserver {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot);

    fn on_finish(&mut self, _output: &BmcOutput) {}
}

/// Do nothing
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_iteration(&mut self, _snapshot: &IterationSnapshot) {}
}

/// Log each iteration with `info!`
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot) {
        let ef = snapshot
            .ef
            .iter()
            .map(|x| format!("{:.3}", x))
            .collect::<Vec<_>>();
        info!(
            "VB iter {:4}: F = {:12.4}, ΔF = {:.2e}, E[f] = [{}]",
            snapshot.iteration,
            snapshot.free_energy,
            snapshot.delta,
            ef.join(" ")
        );
    }

    fn on_finish(&mut self, output: &BmcOutput) {
        info!(
            "VB stopped after {} iteration(s): {} (F = {:.4})",
            output.iterations,
            output.stop_reason,
            output.free_energy
        );
    }
}

/// Collect the Free-Energy trace as it is reported
#[derive(Default)]
pub struct TraceRecorder {
    pub free_energy: Vec<f64>,
    pub finished: bool,
}

impl ProgressObserver for TraceRecorder {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot) {
        self.free_energy.push(snapshot.free_energy);
    }

    fn on_finish(&mut self, _output: &BmcOutput) {
        self.finished = true;
    }
}
