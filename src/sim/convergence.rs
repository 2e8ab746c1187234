//! Auto-stop state machine
//!
//! Time is passed in explicitly (elapsed since the stepper started), so the
//! same controller works on the host's frame clock and on the worker's
//! interval timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::settings::Settings;

/// Where the simulation is in its run/settle/stop cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fewer than two nodes; never steps
    Idle,
    /// Stepping every tick
    Active,
    /// Energy below threshold, waiting out the grace period
    Quiescing,
    /// No further steps until re-energized
    Stopped,
}

/// Decides whether the simulation keeps stepping
#[derive(Debug, Clone)]
pub struct ConvergenceController {
    phase: Phase,
    last_energized: Duration,
    smoothed_energy: f64,
    last_energy: f64,
    populated: bool,
}

impl Default for ConvergenceController {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceController {
    /// New controller; stays idle until energized with at least two nodes
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            last_energized: Duration::ZERO,
            smoothed_energy: f64::INFINITY,
            last_energy: f64::INFINITY,
            populated: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True while the simulation should run a step on this tick
    pub fn should_step(&self) -> bool {
        matches!(self.phase, Phase::Active | Phase::Quiescing)
    }

    /// Energy of the most recent step (infinite right after an energizing event)
    pub fn energy(&self) -> f64 {
        self.last_energy
    }

    /// Exponentially smoothed energy
    pub fn smoothed_energy(&self) -> f64 {
        self.smoothed_energy
    }

    /// Time of the most recent energizing event
    pub fn last_energized(&self) -> Duration {
        self.last_energized
    }

    /// Record the current node count; fewer than two nodes forces `Idle`
    pub fn sync_population(&mut self, node_count: usize) {
        self.populated = node_count >= 2;
        if !self.populated && self.phase != Phase::Idle {
            debug!(node_count, "too few nodes, going idle");
            self.phase = Phase::Idle;
        }
    }

    /// Start, structural growth, kick: run again and restart the grace period
    pub fn energize(&mut self, now: Duration) {
        self.last_energized = now;
        self.smoothed_energy = f64::INFINITY;
        self.last_energy = f64::INFINITY;
        if !self.populated {
            self.phase = Phase::Idle;
            return;
        }
        if self.phase != Phase::Active {
            debug!(from = ?self.phase, "energized");
        }
        self.phase = Phase::Active;
    }

    /// Explicit stop; does not wait for quiescence
    pub fn stop(&mut self) {
        if self.phase != Phase::Idle {
            self.phase = Phase::Stopped;
        }
    }

    /// Feed the energy of the step that just ran and get the new phase
    pub fn observe(&mut self, energy: f64, now: Duration, settings: &Settings) -> Phase {
        if !self.should_step() {
            return self.phase;
        }

        self.last_energy = energy;
        self.smoothed_energy = if self.smoothed_energy.is_finite() {
            let weight = settings.energy_smoothing;
            self.smoothed_energy * (1.0 - weight) + energy * weight
        } else {
            energy
        };

        let threshold = settings.min_energy_threshold;
        let below = energy < threshold && self.smoothed_energy < threshold;
        if !below {
            self.phase = Phase::Active;
            return self.phase;
        }

        self.phase = Phase::Quiescing;
        if now.saturating_sub(self.last_energized) > settings.quiescence_delay() {
            info!(energy, smoothed = self.smoothed_energy, "layout settled");
            self.phase = Phase::Stopped;
        }
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn populated() -> ConvergenceController {
        let mut controller = ConvergenceController::new();
        controller.sync_population(2);
        controller
    }

    #[test]
    fn idle_until_two_nodes() {
        let mut controller = ConvergenceController::new();
        controller.sync_population(1);
        controller.energize(ms(0));
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(!controller.should_step());

        controller.sync_population(2);
        controller.energize(ms(0));
        assert_eq!(controller.phase(), Phase::Active);
    }

    #[test]
    fn waits_out_grace_period_before_stopping() {
        let settings = Settings::default();
        let mut controller = populated();
        controller.energize(ms(0));

        assert_eq!(controller.observe(0.0, ms(100), &settings), Phase::Quiescing);
        assert_eq!(controller.observe(0.0, ms(900), &settings), Phase::Quiescing);
        assert_eq!(controller.observe(0.0, ms(1001), &settings), Phase::Stopped);
        assert!(!controller.should_step());
    }

    #[test]
    fn high_energy_keeps_running_past_delay() {
        let settings = Settings::default();
        let mut controller = populated();
        controller.energize(ms(0));

        assert_eq!(controller.observe(5.0, ms(5000), &settings), Phase::Active);
    }

    #[test]
    fn smoothed_energy_blocks_stop_on_momentary_dip() {
        let settings = Settings::default();
        let mut controller = populated();
        controller.energize(ms(0));

        controller.observe(10.0, ms(1500), &settings);
        // instantaneous energy dips (e.g. a turning point) but the average is still high
        assert_eq!(controller.observe(0.0, ms(1600), &settings), Phase::Active);
    }

    #[test]
    fn energizing_restarts_from_stopped() {
        let settings = Settings::default();
        let mut controller = populated();
        controller.energize(ms(0));
        controller.observe(0.0, ms(2000), &settings);
        assert_eq!(controller.phase(), Phase::Stopped);

        controller.energize(ms(2100));
        assert_eq!(controller.phase(), Phase::Active);
        assert!(controller.energy().is_infinite());
        // grace period restarts at the energizing event
        assert_eq!(controller.observe(0.0, ms(2500), &settings), Phase::Quiescing);
    }

    #[test]
    fn explicit_stop_halts_stepping() {
        let mut controller = populated();
        controller.energize(ms(0));
        controller.stop();
        assert_eq!(controller.phase(), Phase::Stopped);
        assert_eq!(
            controller.observe(100.0, ms(10), &Settings::default()),
            Phase::Stopped
        );
    }

    #[test]
    fn losing_nodes_goes_idle() {
        let mut controller = populated();
        controller.energize(ms(0));
        controller.sync_population(1);
        assert_eq!(controller.phase(), Phase::Idle);
    }
}
