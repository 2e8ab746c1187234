//! Execution strategies for the simulation
//!
//! A [`LayoutStrategy`] hides where the simulation runs. The host talks to
//! it exclusively through [`HostMessage`]s and drains [`LayoutEvent`]s with
//! `pump`, so both implementations are interchangeable:
//!
//! - [`EmbeddedStepper`]: steps inline, once per `pump` call
//! - [`OffloadedStepper`]: steps on a tokio task with its own interval timer

use glam::DVec3;
use tracing::debug;

use crate::error::{ProtocolError, StructuralError};
use crate::model::{EdgeSnapshot, GraphSnapshot, NodePosition, NodeSnapshot};
use crate::settings::{Settings, SettingsPatch};

pub mod clock;
pub mod embedded;
pub mod engine;
pub mod offloaded;
pub mod protocol;

pub use clock::{FixedStepClock, TickSource, WallClock};
pub use embedded::EmbeddedStepper;
pub use engine::{LayoutEngine, Tick};
pub use offloaded::{OffloadedStepper, run_worker};
pub use protocol::{HostMessage, WorkerMessage};

/// Which strategy is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Embedded,
    Offloaded,
}

/// New anchoring state (and optionally position, radius or mass) for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStateUpdate {
    pub node_id: String,
    pub is_fixed: bool,
    pub is_pinned: bool,
    pub position: Option<DVec3>,
    pub radius: Option<f64>,
    pub mass: Option<f64>,
}

/// An incremental graph change
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddNode(NodeSnapshot),
    RemoveNode { node_id: String },
    AddEdge(EdgeSnapshot),
    RemoveEdge { source_id: String, target_id: String },
    UpdateNodeState(NodeStateUpdate),
}

impl From<Mutation> for HostMessage {
    fn from(mutation: Mutation) -> Self {
        match mutation {
            Mutation::AddNode(node) => HostMessage::AddNode { node },
            Mutation::RemoveNode { node_id } => HostMessage::RemoveNode { node_id },
            Mutation::AddEdge(edge) => HostMessage::AddEdge { edge },
            Mutation::RemoveEdge {
                source_id,
                target_id,
            } => HostMessage::RemoveEdge {
                source_id,
                target_id,
            },
            Mutation::UpdateNodeState(update) => HostMessage::UpdateNodeState {
                node_id: update.node_id,
                is_fixed: update.is_fixed,
                is_pinned: update.is_pinned,
                position: update.position,
                radius: update.radius,
                mass: update.mass,
            },
        }
    }
}

/// Something the simulation reported back to the host
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutEvent {
    /// New positions after one step
    Positions {
        positions: Vec<NodePosition>,
        energy: f64,
    },
    /// The layout settled
    Stopped { energy: f64 },
    /// A mutation was refused; the simulation kept running
    Rejected(StructuralError),
}

impl LayoutEvent {
    /// Event carried by a worker message
    ///
    /// An `Error` message means the worker could not decode what it was
    /// sent, which is a failure of the strategy rather than an event.
    pub fn from_worker(message: WorkerMessage) -> Result<Self, ProtocolError> {
        match message {
            WorkerMessage::PositionsUpdate { positions, energy } => {
                Ok(LayoutEvent::Positions { positions, energy })
            }
            WorkerMessage::Stopped { energy } => Ok(LayoutEvent::Stopped { energy }),
            WorkerMessage::Rejected { error } => Ok(LayoutEvent::Rejected(error)),
            WorkerMessage::Error { message } => Err(ProtocolError::UnexpectedMessage(message)),
        }
    }
}

/// Listener for position updates
pub type PositionsCallback = Box<dyn FnMut(&[NodePosition], f64) + Send>;

/// Common interface of the embedded and offloaded steppers
pub trait LayoutStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Deliver one message to the simulation
    ///
    /// Structural problems are reported later as [`LayoutEvent::Rejected`];
    /// an error here means the channel itself is broken.
    fn send(&mut self, message: HostMessage) -> Result<(), ProtocolError>;

    /// Register a listener called for every position update
    fn on_positions(&mut self, callback: PositionsCallback);

    /// Collect everything that happened since the last call
    ///
    /// The embedded stepper runs (at most) one step here; the offloaded one
    /// only drains its inbox.
    fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError>;

    /// Release the simulation; later calls fail with `WorkerTerminated`
    fn dispose(&mut self);

    /// Load a full graph and settings, replacing anything loaded before
    fn init(&mut self, snapshot: GraphSnapshot, settings: Settings) -> Result<(), ProtocolError> {
        self.send(HostMessage::Init {
            nodes: snapshot.nodes,
            edges: snapshot.edges,
            settings,
        })
    }

    fn start(&mut self) -> Result<(), ProtocolError> {
        self.send(HostMessage::Start)
    }

    fn stop(&mut self) -> Result<(), ProtocolError> {
        self.send(HostMessage::Stop)
    }

    /// Randomly perturb free nodes and resume stepping
    fn kick(&mut self, intensity: f64) -> Result<(), ProtocolError> {
        self.send(HostMessage::Kick { intensity })
    }

    fn mutate(&mut self, mutation: Mutation) -> Result<(), ProtocolError> {
        self.send(mutation.into())
    }

    fn update_settings(&mut self, patch: SettingsPatch) -> Result<(), ProtocolError> {
        self.send(HostMessage::UpdateSettings { settings: patch })
    }
}

/// Call every listener for each position event in `events`
pub(crate) fn notify(listeners: &mut [PositionsCallback], events: &[LayoutEvent]) {
    if listeners.is_empty() {
        return;
    }
    for event in events {
        if let LayoutEvent::Positions { positions, energy } = event {
            for listener in listeners.iter_mut() {
                listener(positions, *energy);
            }
        }
    }
}

pub(crate) fn log_rejections(events: &[LayoutEvent]) {
    for event in events {
        if let LayoutEvent::Rejected(error) = event {
            debug!(%error, "mutation rejected by simulation");
        }
    }
}
