//! Background stepper: the simulation runs on its own tokio task
//!
//! The task owns a [`LayoutEngine`] and an interval timer. Host messages
//! arrive over an unbounded channel so mutations never wait on the
//! simulation; updates go back over a bounded one.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::engine::LayoutEngine;
use super::protocol::{HostMessage, WorkerMessage};
use super::{LayoutEvent, LayoutStrategy, PositionsCallback, StrategyKind, log_rejections, notify};
use crate::error::ProtocolError;
use crate::sim::SimulationState;

/// Worker → host channel capacity
pub const EVENT_CAPACITY: usize = 64;

/// Run the simulation loop until the command channel closes
///
/// Pending commands are always handled before the next step. Used both by
/// [`OffloadedStepper`] and by the `graphforce worker` stdio bridge.
pub async fn run_worker(
    commands: UnboundedReceiver<HostMessage>,
    events: mpsc::Sender<WorkerMessage>,
) {
    run_engine(LayoutEngine::new(), commands, events).await;
}

async fn run_engine(
    mut engine: LayoutEngine,
    mut commands: UnboundedReceiver<HostMessage>,
    events: mpsc::Sender<WorkerMessage>,
) {
    let origin = Instant::now();
    let mut period = engine.state().settings().tick_interval();
    let mut ticker = interval_at(origin + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?period, "layout worker started");

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                let name = command.name();
                for error in engine.receive(command, origin.elapsed()) {
                    debug!(message = name, %error, "rejected");
                    if events.send(WorkerMessage::Rejected { error }).await.is_err() {
                        return;
                    }
                }

                let wanted = engine.state().settings().tick_interval();
                if wanted != period {
                    debug!(from = ?period, to = ?wanted, "tick interval changed");
                    period = wanted;
                    ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }

            _ = ticker.tick() => {
                let Some(tick) = engine.tick(origin.elapsed()) else {
                    continue;
                };
                let update = WorkerMessage::PositionsUpdate {
                    positions: tick.positions,
                    energy: tick.energy,
                };
                if events.send(update).await.is_err() {
                    return;
                }
                if tick.stopped
                    && events
                        .send(WorkerMessage::Stopped { energy: tick.energy })
                        .await
                        .is_err()
                {
                    return;
                }
            }
        }
    }
    debug!("layout worker finished");
}

/// Runs the simulation on a background tokio task
///
/// Must be created inside a tokio runtime.
pub struct OffloadedStepper {
    commands: Option<UnboundedSender<HostMessage>>,
    events: mpsc::Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    listeners: Vec<PositionsCallback>,
    initialized: bool,
    failure: Option<ProtocolError>,
}

impl OffloadedStepper {
    pub fn spawn() -> Self {
        Self::spawn_engine(LayoutEngine::new())
    }

    /// Deterministic worker for tests and offline runs
    pub fn spawn_seeded(seed: u64) -> Self {
        let state = SimulationState::with_seed(Default::default(), seed);
        Self::spawn_engine(LayoutEngine::with_state(state))
    }

    fn spawn_engine(engine: LayoutEngine) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let handle = tokio::spawn(run_engine(engine, command_rx, event_tx));
        info!("layout worker spawned");
        Self {
            commands: Some(command_tx),
            events: event_rx,
            handle: Some(handle),
            listeners: Vec::new(),
            initialized: false,
            failure: None,
        }
    }

    /// Wait for the next event from the worker
    ///
    /// Fails with `WorkerTerminated` once the worker is gone, or with
    /// `UnexpectedMessage` when the worker reports an error.
    pub async fn recv(&mut self) -> Result<LayoutEvent, ProtocolError> {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        let message = self
            .events
            .recv()
            .await
            .ok_or_else(|| Self::terminated("event channel closed"))?;
        let event = Self::translate(message)?;
        let single = std::slice::from_ref(&event);
        log_rejections(single);
        notify(&mut self.listeners, single);
        Ok(event)
    }

    fn translate(message: WorkerMessage) -> Result<LayoutEvent, ProtocolError> {
        LayoutEvent::from_worker(message).inspect_err(|err| {
            warn!(%err, "worker reported an error");
        })
    }

    fn terminated(reason: &str) -> ProtocolError {
        ProtocolError::WorkerTerminated(reason.to_string())
    }
}

impl LayoutStrategy for OffloadedStepper {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Offloaded
    }

    fn send(&mut self, message: HostMessage) -> Result<(), ProtocolError> {
        let Some(commands) = &self.commands else {
            return Err(Self::terminated("worker disposed"));
        };
        let is_init = matches!(message, HostMessage::Init { .. });
        commands
            .send(message)
            .map_err(|_| Self::terminated("command channel closed"))?;
        self.initialized |= is_init;
        Ok(())
    }

    fn on_positions(&mut self, callback: PositionsCallback) {
        self.listeners.push(callback);
    }

    fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError> {
        if self.commands.is_none() {
            return Err(Self::terminated("worker disposed"));
        }
        if !self.initialized {
            return Err(ProtocolError::NotInitialized);
        }

        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }

        // hand over what arrived first; the next pump reports the failure
        let mut events = Vec::new();
        loop {
            let failure = match self.events.try_recv() {
                Ok(message) => match Self::translate(message) {
                    Ok(event) => {
                        events.push(event);
                        continue;
                    }
                    Err(err) => err,
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => Self::terminated("event channel closed"),
            };
            if events.is_empty() {
                return Err(failure);
            }
            self.failure = Some(failure);
            break;
        }

        log_rejections(&events);
        notify(&mut self.listeners, &events);
        Ok(events)
    }

    fn dispose(&mut self) {
        self.commands = None;
        self.listeners.clear();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("layout worker disposed");
        }
    }
}

impl Drop for OffloadedStepper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::StructuralError;
    use crate::model::{GraphSnapshot, NodeSnapshot};
    use crate::settings::Settings;
    use crate::strategy::Mutation;

    fn pair() -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                NodeSnapshot::new("a", 0.0, 0.0, 0.0),
                NodeSnapshot::new("b", 40.0, 0.0, 0.0),
            ],
            edges: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_streams_positions_after_start() {
        let mut stepper = OffloadedStepper::spawn_seeded(3);
        stepper.init(pair(), Settings::default()).unwrap();
        stepper.start().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), stepper.recv())
            .await
            .unwrap();
        let Ok(LayoutEvent::Positions { positions, energy }) = event else {
            panic!("expected positions, got {event:?}");
        };
        assert_eq!(positions.len(), 2);
        assert!(energy > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_reports_rejections() {
        let mut stepper = OffloadedStepper::spawn_seeded(3);
        stepper.init(pair(), Settings::default()).unwrap();
        stepper
            .mutate(Mutation::AddNode(NodeSnapshot::new("a", 1.0, 1.0, 1.0)))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), stepper.recv())
            .await
            .unwrap();
        assert_eq!(
            event.unwrap(),
            LayoutEvent::Rejected(StructuralError::DuplicateNode("a".to_string()))
        );
    }

    #[tokio::test]
    async fn pump_before_init_is_an_error() {
        let mut stepper = OffloadedStepper::spawn();
        assert!(matches!(stepper.pump(), Err(ProtocolError::NotInitialized)));
    }

    #[tokio::test]
    async fn disposed_worker_refuses_messages() {
        let mut stepper = OffloadedStepper::spawn();
        stepper.init(pair(), Settings::default()).unwrap();
        stepper.dispose();
        assert!(matches!(
            stepper.kick(1.0),
            Err(ProtocolError::WorkerTerminated(_))
        ));
        assert!(matches!(
            stepper.pump(),
            Err(ProtocolError::WorkerTerminated(_))
        ));
    }

    fn stepper_fed_by(events: mpsc::Receiver<WorkerMessage>) -> OffloadedStepper {
        let (commands, _) = mpsc::unbounded_channel();
        OffloadedStepper {
            commands: Some(commands),
            events,
            handle: None,
            listeners: Vec::new(),
            initialized: true,
            failure: None,
        }
    }

    #[tokio::test]
    async fn worker_error_fails_pump_after_earlier_events() {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let mut stepper = stepper_fed_by(rx);
        tx.send(WorkerMessage::Stopped { energy: 0.0 }).await.unwrap();
        tx.send(WorkerMessage::Error {
            message: "expected value at line 1".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            stepper.pump().unwrap(),
            vec![LayoutEvent::Stopped { energy: 0.0 }]
        );
        assert!(matches!(
            stepper.pump(),
            Err(ProtocolError::UnexpectedMessage(ref m)) if m == "expected value at line 1"
        ));
        assert!(stepper.pump().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_error_fails_recv() {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let mut stepper = stepper_fed_by(rx);
        tx.send(WorkerMessage::Error {
            message: "bad".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(matches!(
            stepper.recv().await,
            Err(ProtocolError::UnexpectedMessage(_))
        ));
        assert!(matches!(
            stepper.recv().await,
            Err(ProtocolError::WorkerTerminated(_))
        ));
    }
}
