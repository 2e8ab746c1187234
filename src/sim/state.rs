//! Mutable node/edge registry for one simulation
//!
//! Mutations validate first and change nothing on error, so a rejected
//! operation can never leave a half-applied edit behind.

use std::collections::HashMap;

use glam::DVec3;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::kernel::random_unit;
use super::{SimGraph, compute_forces, integrate};
use crate::error::{StructuralError, StructuralResult};
use crate::model::{
    EdgeSnapshot, GraphSnapshot, NodePosition, NodeSnapshot, SimEdge, SimNode, clamp_mass,
    clamp_radius,
};
use crate::settings::{Settings, SettingsPatch};

/// Owns the nodes, edges and settings of one layout
pub struct SimulationState {
    graph: SimGraph,
    /// Mapping from node id to arena slot
    node_id_to_index: HashMap<String, NodeIndex>,
    settings: Settings,
    rng: StdRng,
}

impl SimulationState {
    /// Empty state with the given settings
    pub fn new(settings: Settings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Empty state whose kicks are reproducible
    pub fn with_seed(settings: Settings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut settings: Settings, rng: StdRng) -> Self {
        settings.validate();
        Self {
            graph: SimGraph::default(),
            node_id_to_index: HashMap::new(),
            settings,
            rng,
        }
    }

    /// Build a state from a host snapshot
    ///
    /// Invalid entries are skipped; their errors are returned alongside the
    /// state.
    pub fn from_snapshot(
        snapshot: &GraphSnapshot,
        settings: Settings,
    ) -> (Self, Vec<StructuralError>) {
        let mut state = Self::new(settings);
        let errors = state.load(snapshot);
        (state, errors)
    }

    /// Replace all nodes and edges with the snapshot's contents
    pub fn load(&mut self, snapshot: &GraphSnapshot) -> Vec<StructuralError> {
        self.graph.clear();
        self.node_id_to_index.clear();

        let mut errors = Vec::new();
        for node in &snapshot.nodes {
            if let Err(err) = self.add_node(node.to_sim_node()) {
                errors.push(err);
            }
        }
        for edge in &snapshot.edges {
            if let Err(err) = self.add_edge(edge.to_sim_edge(&self.settings)) {
                errors.push(err);
            }
        }
        errors
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Register a node
    pub fn add_node(&mut self, node: SimNode) -> StructuralResult<()> {
        if self.node_id_to_index.contains_key(&node.id) {
            return Err(rejected(StructuralError::DuplicateNode(node.id)));
        }
        debug!(node = %node.id, "add node");
        let id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_id_to_index.insert(id, index);
        Ok(())
    }

    /// Remove a node and every edge touching it; returns the number of edges removed
    pub fn remove_node(&mut self, id: &str) -> StructuralResult<usize> {
        let index = self.index_of(id)?;
        let edges = self.graph.edges(index).count();
        self.graph.remove_node(index);
        self.node_id_to_index.remove(id);
        debug!(node = id, edges, "remove node");
        Ok(edges)
    }

    /// Update anchoring flags and optionally move the node
    ///
    /// Anchoring zeroes the velocity immediately. A position override is
    /// applied verbatim.
    pub fn set_node_flags(
        &mut self,
        id: &str,
        is_fixed: bool,
        is_pinned: bool,
        position: Option<DVec3>,
    ) -> StructuralResult<()> {
        let index = self.index_of(id)?;
        let node = &mut self.graph[index];
        node.is_fixed = is_fixed;
        node.is_pinned = is_pinned;
        if node.is_anchored() {
            node.velocity = DVec3::ZERO;
        }
        if let Some(position) = position.filter(|p| p.is_finite()) {
            node.position = position;
        }
        Ok(())
    }

    /// Change a node's radius (negative values become zero)
    pub fn set_node_radius(&mut self, id: &str, radius: f64) -> StructuralResult<()> {
        let index = self.index_of(id)?;
        let node = &mut self.graph[index];
        node.radius = clamp_radius(radius);
        Ok(())
    }

    /// Change a node's mass (clamped like a snapshot's)
    pub fn set_node_mass(&mut self, id: &str, mass: f64) -> StructuralResult<()> {
        let index = self.index_of(id)?;
        self.graph[index].mass = clamp_mass(mass);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&SimNode> {
        self.node_id_to_index.get(id).map(|&index| &self.graph[index])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.graph.node_weights()
    }

    // =========================================================================
    // Edge Operations
    // =========================================================================

    /// Register an edge between two existing nodes
    pub fn add_edge(&mut self, edge: SimEdge) -> StructuralResult<()> {
        if edge.source_id == edge.target_id {
            return Err(rejected(StructuralError::SelfEdge(edge.source_id)));
        }
        let source = self.index_of(&edge.source_id)?;
        let target = self.index_of(&edge.target_id)?;
        if self.graph.find_edge(source, target).is_some() {
            return Err(rejected(StructuralError::DuplicateEdge {
                source_id: edge.source_id,
                target_id: edge.target_id,
            }));
        }
        debug!(
            source = %edge.source_id,
            target = %edge.target_id,
            kind = ?edge.constraint.kind(),
            "add edge"
        );
        self.graph.add_edge(source, target, edge);
        Ok(())
    }

    /// Remove the edge joining two nodes, in either orientation
    pub fn remove_edge(&mut self, source_id: &str, target_id: &str) -> StructuralResult<SimEdge> {
        let unknown = || StructuralError::UnknownEdge {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        };
        let (Some(&source), Some(&target)) = (
            self.node_id_to_index.get(source_id),
            self.node_id_to_index.get(target_id),
        ) else {
            return Err(rejected(unknown()));
        };
        let edge = self
            .graph
            .find_edge(source, target)
            .and_then(|index| self.graph.remove_edge(index))
            .ok_or_else(|| rejected(unknown()))?;
        debug!(source = source_id, target = target_id, "remove edge");
        Ok(edge)
    }

    /// Edges touching a node
    pub fn edges_of(&self, id: &str) -> Vec<&SimEdge> {
        match self.node_id_to_index.get(id) {
            Some(&index) => self.graph.edges(index).map(|e| &self.graph[e.id()]).collect(),
            None => Vec::new(),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn edges(&self) -> impl Iterator<Item = &SimEdge> {
        self.graph.edge_weights()
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Merge a partial update; positions and velocities are untouched
    pub fn update_settings(&mut self, patch: &SettingsPatch) {
        self.settings.apply(patch);
    }

    /// Replace the settings wholesale; positions and velocities are untouched
    pub fn replace_settings(&mut self, mut settings: Settings) {
        settings.validate();
        self.settings = settings;
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Run one kernel + integrator step and return the total kinetic energy
    pub fn step(&mut self) -> f64 {
        let forces = compute_forces(&self.graph, &self.settings);
        integrate(&mut self.graph, &forces, &self.settings)
    }

    /// Add a random impulse to every free node; returns how many were kicked
    pub fn kick(&mut self, intensity: f64) -> usize {
        let z_spread = self.settings.z_spread_factor;
        let mut kicked = 0;
        for node in self.graph.node_weights_mut() {
            if node.is_anchored() {
                continue;
            }
            let factor = self.rng.gen_range(0.5..1.5);
            let mut impulse = random_unit(&mut self.rng) * intensity * factor;
            impulse.z *= z_spread;
            node.velocity += impulse;
            kicked += 1;
        }
        debug!(intensity, kicked, "kick");
        kicked
    }

    /// Total kinetic energy of the current velocities
    pub fn kinetic_energy(&self) -> f64 {
        self.graph.node_weights().map(SimNode::kinetic_energy).sum()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Current position of every node
    pub fn positions(&self) -> Vec<NodePosition> {
        self.graph
            .node_weights()
            .map(|node| NodePosition {
                id: node.id.clone(),
                x: node.position.x,
                y: node.position.y,
                z: node.position.z,
            })
            .collect()
    }

    /// Full copy of the current nodes and edges
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.graph.node_weights().map(NodeSnapshot::from_sim_node).collect(),
            edges: self.graph.edge_weights().map(EdgeSnapshot::from_sim_edge).collect(),
        }
    }

    fn index_of(&self, id: &str) -> StructuralResult<NodeIndex> {
        self.node_id_to_index
            .get(id)
            .copied()
            .ok_or_else(|| rejected(StructuralError::UnknownNode(id.to_string())))
    }
}

fn rejected(err: StructuralError) -> StructuralError {
    warn!(error = %err, "mutation rejected");
    err
}
