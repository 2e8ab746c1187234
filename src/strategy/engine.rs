//! Kernel + integrator + controller, driven by host messages
//!
//! Both steppers own one [`LayoutEngine`]; they differ only in where it
//! runs and how messages reach it.

use std::time::Duration;

use tracing::{debug, info};

use super::protocol::HostMessage;
use crate::error::StructuralError;
use crate::model::{GraphSnapshot, NodePosition};
use crate::settings::Settings;
use crate::sim::{ConvergenceController, Phase, SimulationState};

/// Outcome of one simulated step
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub positions: Vec<NodePosition>,
    pub energy: f64,
    /// This step moved the controller into `Stopped`
    pub stopped: bool,
}

/// Simulation state plus convergence gate, with an init backlog
pub struct LayoutEngine {
    state: SimulationState,
    controller: ConvergenceController,
    initialized: bool,
    backlog: Vec<HostMessage>,
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutEngine {
    pub fn new() -> Self {
        Self::with_state(SimulationState::new(Settings::default()))
    }

    /// Engine around an existing (empty) state, e.g. a seeded one
    pub fn with_state(state: SimulationState) -> Self {
        Self {
            state,
            controller: ConvergenceController::new(),
            initialized: false,
            backlog: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.state.snapshot()
    }

    /// Handle one host message at time `now`
    ///
    /// Messages that arrive before `init` are held and replayed, in order,
    /// right after it.
    pub fn receive(&mut self, message: HostMessage, now: Duration) -> Vec<StructuralError> {
        match message {
            HostMessage::Init {
                nodes,
                edges,
                settings,
            } => {
                let mut errors = self.init(GraphSnapshot { nodes, edges }, settings);
                let backlog = std::mem::take(&mut self.backlog);
                if !backlog.is_empty() {
                    debug!(queued = backlog.len(), "replaying messages received before init");
                }
                for queued in backlog {
                    errors.extend(self.apply(queued, now).err());
                }
                errors
            }
            other if !self.initialized => {
                debug!(message = other.name(), "queued until init");
                self.backlog.push(other);
                Vec::new()
            }
            other => self.apply(other, now).err().into_iter().collect(),
        }
    }

    fn init(&mut self, snapshot: GraphSnapshot, mut settings: Settings) -> Vec<StructuralError> {
        settings.validate();
        self.state.replace_settings(settings);
        let errors = self.state.load(&snapshot);
        self.controller = ConvergenceController::new();
        self.controller.sync_population(self.state.node_count());
        self.initialized = true;
        info!(
            nodes = self.state.node_count(),
            edges = self.state.edge_count(),
            rejected = errors.len(),
            "layout initialized"
        );
        errors
    }

    fn apply(&mut self, message: HostMessage, now: Duration) -> Result<(), StructuralError> {
        match message {
            // never queued; receive handles it before dispatching here
            HostMessage::Init { .. } => {}
            HostMessage::Start => {
                self.controller.energize(now);
            }
            HostMessage::Stop => {
                self.controller.stop();
            }
            HostMessage::Kick { intensity } => {
                self.state.kick(intensity);
                self.controller.energize(now);
            }
            HostMessage::UpdateSettings { settings } => {
                self.state.update_settings(&settings);
            }
            HostMessage::AddNode { node } => {
                self.state.add_node(node.to_sim_node())?;
                self.controller.sync_population(self.state.node_count());
                self.controller.energize(now);
            }
            HostMessage::RemoveNode { node_id } => {
                self.state.remove_node(&node_id)?;
                self.controller.sync_population(self.state.node_count());
            }
            HostMessage::AddEdge { edge } => {
                let edge = edge.to_sim_edge(self.state.settings());
                self.state.add_edge(edge)?;
                self.controller.energize(now);
            }
            HostMessage::RemoveEdge {
                source_id,
                target_id,
            } => {
                self.state.remove_edge(&source_id, &target_id)?;
            }
            HostMessage::UpdateNodeState {
                node_id,
                is_fixed,
                is_pinned,
                position,
                radius,
                mass,
            } => {
                self.state
                    .set_node_flags(&node_id, is_fixed, is_pinned, position)?;
                if let Some(radius) = radius {
                    self.state.set_node_radius(&node_id, radius)?;
                }
                if let Some(mass) = mass {
                    self.state.set_node_mass(&node_id, mass)?;
                }
            }
        }
        Ok(())
    }

    /// Run one step if the controller allows it
    pub fn tick(&mut self, now: Duration) -> Option<Tick> {
        if !self.initialized || !self.controller.should_step() {
            return None;
        }
        let energy = self.state.step();
        let phase = self
            .controller
            .observe(energy, now, self.state.settings());
        Some(Tick {
            positions: self.state.positions(),
            energy,
            stopped: phase == Phase::Stopped,
        })
    }
}
