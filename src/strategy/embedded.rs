//! Inline stepper: one simulation step per host frame

use tracing::info;

use super::clock::{FixedStepClock, TickSource};
use super::engine::LayoutEngine;
use super::protocol::HostMessage;
use super::{LayoutEvent, LayoutStrategy, PositionsCallback, StrategyKind, log_rejections, notify};
use crate::error::ProtocolError;
use crate::model::GraphSnapshot;
use crate::sim::{Phase, SimulationState};

/// Runs the simulation on the caller's thread
///
/// Nothing happens between calls: each `pump` reads the tick source once
/// and runs at most one step.
pub struct EmbeddedStepper {
    engine: LayoutEngine,
    clock: Box<dyn TickSource>,
    listeners: Vec<PositionsCallback>,
    pending: Vec<LayoutEvent>,
    disposed: bool,
}

impl Default for EmbeddedStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedStepper {
    /// Stepper on simulated 60 Hz frames
    pub fn new() -> Self {
        Self::with_clock(Box::new(FixedStepClock::sixty_hz()))
    }

    pub fn with_clock(clock: Box<dyn TickSource>) -> Self {
        Self::with_engine(LayoutEngine::new(), clock)
    }

    /// Stepper around a prepared engine, e.g. one with a seeded state
    pub fn with_engine(engine: LayoutEngine, clock: Box<dyn TickSource>) -> Self {
        Self {
            engine,
            clock,
            listeners: Vec::new(),
            pending: Vec::new(),
            disposed: false,
        }
    }

    /// Deterministic stepper for tests and offline runs
    pub fn seeded(seed: u64) -> Self {
        let state = SimulationState::with_seed(Default::default(), seed);
        Self::with_engine(
            LayoutEngine::with_state(state),
            Box::new(FixedStepClock::sixty_hz()),
        )
    }

    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    pub fn state(&self) -> &SimulationState {
        self.engine.state()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.engine.snapshot()
    }
}

impl LayoutStrategy for EmbeddedStepper {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Embedded
    }

    fn send(&mut self, message: HostMessage) -> Result<(), ProtocolError> {
        if self.disposed {
            return Err(ProtocolError::WorkerTerminated(
                "embedded stepper disposed".to_string(),
            ));
        }
        let rejected = self.engine.receive(message, self.clock.now());
        self.pending
            .extend(rejected.into_iter().map(LayoutEvent::Rejected));
        Ok(())
    }

    fn on_positions(&mut self, callback: PositionsCallback) {
        self.listeners.push(callback);
    }

    fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError> {
        if self.disposed {
            return Err(ProtocolError::WorkerTerminated(
                "embedded stepper disposed".to_string(),
            ));
        }
        if !self.engine.is_initialized() {
            return Err(ProtocolError::NotInitialized);
        }

        let mut events = std::mem::take(&mut self.pending);
        let now = self.clock.tick();
        if let Some(tick) = self.engine.tick(now) {
            events.push(LayoutEvent::Positions {
                positions: tick.positions,
                energy: tick.energy,
            });
            if tick.stopped {
                events.push(LayoutEvent::Stopped {
                    energy: tick.energy,
                });
            }
        }

        log_rejections(&events);
        notify(&mut self.listeners, &events);
        Ok(events)
    }

    fn dispose(&mut self) {
        if !self.disposed {
            info!("embedded stepper disposed");
        }
        self.disposed = true;
        self.listeners.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::StructuralError;
    use crate::model::{ConstraintType, EdgeSnapshot, NodeSnapshot};
    use crate::settings::Settings;
    use crate::strategy::Mutation;

    fn pair() -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                NodeSnapshot::new("a", 0.0, 0.0, 0.0),
                NodeSnapshot::new("b", 50.0, 0.0, 0.0),
            ],
            edges: vec![EdgeSnapshot::new("a", "b", ConstraintType::Elastic)],
        }
    }

    #[test]
    fn pump_before_init_is_an_error() {
        let mut stepper = EmbeddedStepper::seeded(1);
        assert!(matches!(stepper.pump(), Err(ProtocolError::NotInitialized)));
    }

    #[test]
    fn each_pump_runs_one_step_and_notifies_listeners() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut stepper = EmbeddedStepper::seeded(1);
        stepper.on_positions(Box::new(move |positions, _| {
            assert_eq!(positions.len(), 2);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        stepper.init(pair(), Settings::default()).unwrap();
        stepper.start().unwrap();

        for _ in 0..3 {
            let events = stepper.pump().unwrap();
            assert!(matches!(events[0], LayoutEvent::Positions { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejected_mutation_surfaces_on_next_pump() {
        let mut stepper = EmbeddedStepper::seeded(1);
        stepper.init(pair(), Settings::default()).unwrap();
        stepper
            .mutate(Mutation::AddEdge(EdgeSnapshot::new(
                "a",
                "a",
                ConstraintType::Rigid,
            )))
            .unwrap();

        let events = stepper.pump().unwrap();
        assert_eq!(
            events,
            vec![LayoutEvent::Rejected(StructuralError::SelfEdge(
                "a".to_string()
            ))]
        );
    }

    #[test]
    fn disposed_stepper_refuses_work() {
        let mut stepper = EmbeddedStepper::seeded(1);
        stepper.init(pair(), Settings::default()).unwrap();
        stepper.dispose();
        assert!(matches!(
            stepper.start(),
            Err(ProtocolError::WorkerTerminated(_))
        ));
        assert!(matches!(
            stepper.pump(),
            Err(ProtocolError::WorkerTerminated(_))
        ));
    }
}
