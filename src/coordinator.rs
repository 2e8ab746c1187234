//! Host-facing facade over a layout strategy
//!
//! The coordinator turns host graph events (nodes appearing, drags, resizes)
//! into strategy messages and fans position updates back out to a
//! [`PositionSink`]. It keeps a mirror of the graph so a running layout can
//! be moved to another strategy, or rebuilt after the worker dies.

use std::collections::{BTreeMap, HashSet};

use glam::DVec3;
use tracing::{debug, info, warn};

use crate::error::{LayoutError, ProtocolError, StructuralError, StructuralResult};
use crate::model::{EdgeSnapshot, GraphSnapshot, NodeSnapshot};
use crate::settings::{Settings, SettingsPatch};
use crate::strategy::{
    EmbeddedStepper, LayoutEvent, LayoutStrategy, Mutation, NodeStateUpdate, StrategyKind,
};

/// Kick intensity applied when a drag ends
pub const DRAG_END_KICK: f64 = 0.5;

/// Host side receiver of layout results
pub trait PositionSink {
    fn set_node_position(&mut self, id: &str, position: DVec3);

    /// The layout settled
    fn layout_stopped(&mut self, _energy: f64) {}
}

pub struct LayoutCoordinator<S: PositionSink> {
    strategy: Box<dyn LayoutStrategy>,
    sink: S,
    nodes: BTreeMap<String, NodeSnapshot>,
    edges: Vec<EdgeSnapshot>,
    settings: Settings,
    dragging: HashSet<String>,
    running: bool,
    fallback_on_failure: bool,
}

impl<S: PositionSink> LayoutCoordinator<S> {
    pub fn new(strategy: Box<dyn LayoutStrategy>, sink: S) -> Self {
        Self {
            strategy,
            sink,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            settings: Settings::default(),
            dragging: HashSet::new(),
            running: false,
            fallback_on_failure: false,
        }
    }

    /// Rebuild on an embedded stepper when the strategy's channel breaks
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_on_failure = enabled;
        self
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current mirror of the graph, nodes in id order
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.clone(),
        }
    }

    /// Replace the whole graph and settings
    ///
    /// Invalid entries are skipped and returned; only the valid part reaches
    /// the strategy.
    pub fn load(
        &mut self,
        snapshot: GraphSnapshot,
        mut settings: Settings,
    ) -> Result<Vec<StructuralError>, ProtocolError> {
        settings.validate();
        self.nodes.clear();
        self.edges.clear();
        self.dragging.clear();
        self.running = false;

        let mut errors = Vec::new();
        for node in snapshot.nodes {
            errors.extend(self.insert_node(node).err());
        }
        for edge in snapshot.edges {
            errors.extend(self.insert_edge(edge).err());
        }
        for error in &errors {
            warn!(%error, "skipping invalid graph entry");
        }

        self.settings = settings;
        self.strategy.init(self.snapshot(), self.settings.clone())?;
        info!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            strategy = ?self.strategy.kind(),
            "graph loaded"
        );
        Ok(errors)
    }

    // =========================================================================
    // Graph events
    // =========================================================================

    pub fn node_added(&mut self, node: NodeSnapshot) -> Result<(), LayoutError> {
        self.insert_node(node.clone())?;
        self.strategy.mutate(Mutation::AddNode(node))?;
        Ok(())
    }

    pub fn node_removed(&mut self, node_id: &str) -> Result<(), LayoutError> {
        if self.nodes.remove(node_id).is_none() {
            return Err(StructuralError::UnknownNode(node_id.to_string()).into());
        }
        self.edges
            .retain(|e| e.source_id != node_id && e.target_id != node_id);
        self.dragging.remove(node_id);
        self.strategy.mutate(Mutation::RemoveNode {
            node_id: node_id.to_string(),
        })?;
        Ok(())
    }

    pub fn edge_added(&mut self, edge: EdgeSnapshot) -> Result<(), LayoutError> {
        self.insert_edge(edge.clone())?;
        self.strategy.mutate(Mutation::AddEdge(edge))?;
        Ok(())
    }

    pub fn edge_removed(&mut self, source_id: &str, target_id: &str) -> Result<(), LayoutError> {
        let Some(at) = self.edge_position(source_id, target_id) else {
            return Err(StructuralError::UnknownEdge {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            }
            .into());
        };
        self.edges.remove(at);
        self.strategy.mutate(Mutation::RemoveEdge {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        })?;
        Ok(())
    }

    /// The user grabbed a node; it stops reacting to forces
    pub fn node_drag_started(&mut self, node_id: &str) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.is_fixed = true;
        self.dragging.insert(node_id.to_string());
        self.push_node_state(node_id, |_| {})
    }

    /// The user moved a grabbed node
    pub fn node_dragged(&mut self, node_id: &str, position: DVec3) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.x = position.x;
        node.y = position.y;
        node.z = position.z;
        self.push_node_state(node_id, |update| update.position = Some(position))
    }

    /// The user released a node; it stays put only if pinned
    pub fn node_drag_ended(&mut self, node_id: &str) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.is_fixed = node.is_pinned;
        self.dragging.remove(node_id);
        self.push_node_state(node_id, |_| {})?;
        self.kick(DRAG_END_KICK)?;
        Ok(())
    }

    pub fn node_resized(&mut self, node_id: &str, radius: f64) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.radius = Some(radius);
        self.push_node_state(node_id, |update| update.radius = Some(radius))
    }

    /// Heavier nodes accelerate less under the same forces
    pub fn node_mass_changed(&mut self, node_id: &str, mass: f64) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.mass = Some(mass);
        self.push_node_state(node_id, |update| update.mass = Some(mass))
    }

    /// Pin a node where it is
    pub fn node_pinned(&mut self, node_id: &str) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        node.is_pinned = true;
        self.push_node_state(node_id, |_| {})
    }

    /// Release a pin; the layout resumes around the node
    pub fn node_unpinned(&mut self, node_id: &str) -> Result<(), LayoutError> {
        let dragging = self.dragging.contains(node_id);
        let node = self.node_mut(node_id)?;
        node.is_pinned = false;
        if !dragging {
            node.is_fixed = false;
        }
        self.push_node_state(node_id, |_| {})?;
        self.start()?;
        Ok(())
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub fn update_settings(&mut self, patch: SettingsPatch) -> Result<(), ProtocolError> {
        self.settings.apply(&patch);
        self.strategy.update_settings(patch)
    }

    pub fn start(&mut self) -> Result<(), ProtocolError> {
        self.strategy.start()?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), ProtocolError> {
        self.strategy.stop()?;
        self.running = false;
        Ok(())
    }

    pub fn kick(&mut self, intensity: f64) -> Result<(), ProtocolError> {
        self.strategy.kick(intensity)?;
        self.running = true;
        Ok(())
    }

    /// Drain strategy events and forward positions to the sink
    ///
    /// Updates for nodes that are fixed or being dragged are dropped; the
    /// host owns those positions. On a protocol failure the error is
    /// returned, after switching to an embedded stepper if fallback is on.
    pub fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError> {
        let events = match self.strategy.pump() {
            Ok(events) => events,
            Err(ProtocolError::NotInitialized) => return Err(ProtocolError::NotInitialized),
            Err(err) => {
                if self.fallback_on_failure {
                    self.fall_back(&err);
                }
                return Err(err);
            }
        };

        for event in &events {
            match event {
                LayoutEvent::Positions { positions, .. } => {
                    for update in positions {
                        if self.dragging.contains(&update.id) {
                            continue;
                        }
                        let Some(node) = self.nodes.get_mut(&update.id) else {
                            continue;
                        };
                        if node.is_fixed {
                            continue;
                        }
                        node.x = update.x;
                        node.y = update.y;
                        node.z = update.z;
                        self.sink.set_node_position(&update.id, update.position());
                    }
                }
                LayoutEvent::Stopped { energy } => {
                    self.running = false;
                    self.sink.layout_stopped(*energy);
                }
                LayoutEvent::Rejected(error) => {
                    warn!(%error, "strategy rejected a mutation the mirror accepted");
                }
            }
        }
        Ok(events)
    }

    /// Move the layout to another strategy
    ///
    /// The mirror is snapshotted, the old strategy disposed and the new one
    /// initialised (and started if the layout was running).
    pub fn switch_strategy(
        &mut self,
        strategy: Box<dyn LayoutStrategy>,
    ) -> Result<(), ProtocolError> {
        let from = self.strategy.kind();
        let snapshot = self.snapshot();
        self.strategy.dispose();
        self.strategy = strategy;
        self.strategy.init(snapshot, self.settings.clone())?;
        if self.running {
            self.strategy.start()?;
        }
        info!(?from, to = ?self.strategy.kind(), "switched layout strategy");
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.strategy.dispose();
        self.running = false;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn fall_back(&mut self, cause: &ProtocolError) {
        warn!(%cause, "layout strategy failed, falling back to embedded stepper");
        if let Err(err) = self.switch_strategy(Box::new(EmbeddedStepper::new())) {
            warn!(%err, "embedded fallback failed to initialise");
        }
    }

    fn insert_node(&mut self, node: NodeSnapshot) -> StructuralResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(StructuralError::DuplicateNode(node.id));
        }
        debug!(node = %node.id, "mirror add node");
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn insert_edge(&mut self, edge: EdgeSnapshot) -> StructuralResult<()> {
        if edge.source_id == edge.target_id {
            return Err(StructuralError::SelfEdge(edge.source_id));
        }
        for id in [&edge.source_id, &edge.target_id] {
            if !self.nodes.contains_key(id) {
                return Err(StructuralError::UnknownNode(id.clone()));
            }
        }
        if self.edge_position(&edge.source_id, &edge.target_id).is_some() {
            return Err(StructuralError::DuplicateEdge {
                source_id: edge.source_id,
                target_id: edge.target_id,
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    fn edge_position(&self, a: &str, b: &str) -> Option<usize> {
        self.edges.iter().position(|e| {
            (e.source_id == a && e.target_id == b) || (e.source_id == b && e.target_id == a)
        })
    }

    fn node_mut(&mut self, node_id: &str) -> StructuralResult<&mut NodeSnapshot> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| StructuralError::UnknownNode(node_id.to_string()))
    }

    /// Send the mirrored flags of `node_id` plus whatever `edit` adds
    fn push_node_state(
        &mut self,
        node_id: &str,
        edit: impl FnOnce(&mut NodeStateUpdate),
    ) -> Result<(), LayoutError> {
        let node = self.node_mut(node_id)?;
        let mut update = NodeStateUpdate {
            node_id: node_id.to_string(),
            is_fixed: node.is_fixed,
            is_pinned: node.is_pinned,
            position: None,
            radius: None,
            mass: None,
        };
        edit(&mut update);
        self.strategy.mutate(Mutation::UpdateNodeState(update))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstraintType;
    use crate::strategy::{HostMessage, PositionsCallback};

    #[derive(Default)]
    struct RecordingSink {
        moved: Vec<String>,
        stopped: bool,
    }

    impl PositionSink for RecordingSink {
        fn set_node_position(&mut self, id: &str, _position: DVec3) {
            self.moved.push(id.to_string());
        }

        fn layout_stopped(&mut self, _energy: f64) {
            self.stopped = true;
        }
    }

    /// Strategy whose channel is already broken
    struct DeadStrategy;

    impl LayoutStrategy for DeadStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Offloaded
        }

        fn send(&mut self, _message: HostMessage) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn on_positions(&mut self, _callback: PositionsCallback) {}

        fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError> {
            Err(ProtocolError::WorkerTerminated("gone".to_string()))
        }

        fn dispose(&mut self) {}
    }

    /// Strategy that only records what it was sent
    #[derive(Default)]
    struct RecordingStrategy {
        sent: std::sync::Arc<std::sync::Mutex<Vec<HostMessage>>>,
    }

    impl LayoutStrategy for RecordingStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Embedded
        }

        fn send(&mut self, message: HostMessage) -> Result<(), ProtocolError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn on_positions(&mut self, _callback: PositionsCallback) {}

        fn pump(&mut self) -> Result<Vec<LayoutEvent>, ProtocolError> {
            Ok(Vec::new())
        }

        fn dispose(&mut self) {}
    }

    fn triangle() -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                NodeSnapshot::new("a", 0.0, 0.0, 0.0),
                NodeSnapshot::new("b", 60.0, 0.0, 0.0),
                NodeSnapshot::new("c", 0.0, 60.0, 0.0),
            ],
            edges: vec![
                EdgeSnapshot::new("a", "b", ConstraintType::Elastic),
                EdgeSnapshot::new("b", "c", ConstraintType::Elastic),
            ],
        }
    }

    fn coordinator() -> LayoutCoordinator<RecordingSink> {
        let mut coordinator = LayoutCoordinator::new(
            Box::new(EmbeddedStepper::seeded(11)),
            RecordingSink::default(),
        );
        let errors = coordinator.load(triangle(), Settings::default()).unwrap();
        assert!(errors.is_empty());
        coordinator
    }

    #[test]
    fn load_skips_invalid_entries() {
        let mut coordinator =
            LayoutCoordinator::new(Box::new(EmbeddedStepper::seeded(1)), RecordingSink::default());
        let mut graph = triangle();
        graph.nodes.push(NodeSnapshot::new("a", 5.0, 5.0, 0.0));
        graph
            .edges
            .push(EdgeSnapshot::new("b", "a", ConstraintType::Rigid));
        graph
            .edges
            .push(EdgeSnapshot::new("a", "ghost", ConstraintType::Rigid));

        let errors = coordinator.load(graph, Settings::default()).unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(coordinator.snapshot().nodes.len(), 3);
        assert_eq!(coordinator.snapshot().edges.len(), 2);
    }

    #[test]
    fn pump_forwards_positions_to_sink() {
        let mut coordinator = coordinator();
        coordinator.start().unwrap();
        coordinator.pump().unwrap();
        assert_eq!(coordinator.sink().moved, vec!["a", "b", "c"]);
    }

    #[test]
    fn dragged_node_is_not_overwritten() {
        let mut coordinator = coordinator();
        coordinator.start().unwrap();
        coordinator.node_drag_started("a").unwrap();
        coordinator
            .node_dragged("a", DVec3::new(-40.0, 0.0, 0.0))
            .unwrap();

        for _ in 0..10 {
            coordinator.pump().unwrap();
        }
        assert!(!coordinator.sink().moved.contains(&"a".to_string()));
        let a = &coordinator.snapshot().nodes[0];
        assert_eq!((a.x, a.y, a.z), (-40.0, 0.0, 0.0));

        coordinator.node_drag_ended("a").unwrap();
        coordinator.pump().unwrap();
        assert!(coordinator.sink().moved.contains(&"a".to_string()));
    }

    #[test]
    fn structural_errors_are_caught_before_the_strategy() {
        let mut coordinator = coordinator();
        let err = coordinator
            .edge_added(EdgeSnapshot::new("c", "b", ConstraintType::Weld))
            .unwrap_err();
        assert!(matches!(
            err,
            LayoutError::Structural(StructuralError::DuplicateEdge { .. })
        ));
        assert!(matches!(
            coordinator.node_removed("zzz"),
            Err(LayoutError::Structural(StructuralError::UnknownNode(_)))
        ));
    }

    #[test]
    fn removing_a_node_drops_its_edges_from_the_mirror() {
        let mut coordinator = coordinator();
        coordinator.node_removed("b").unwrap();
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert!(snapshot.edges.is_empty());
    }

    #[test]
    fn layout_settles_and_notifies_sink() {
        let mut coordinator = coordinator();
        coordinator.start().unwrap();
        for _ in 0..5_000 {
            coordinator.pump().unwrap();
            if coordinator.sink().stopped {
                break;
            }
        }
        assert!(coordinator.sink().stopped);
        assert!(!coordinator.is_running());
    }

    #[test]
    fn broken_strategy_falls_back_to_embedded() {
        let mut coordinator =
            LayoutCoordinator::new(Box::new(DeadStrategy), RecordingSink::default())
                .with_fallback(true);
        coordinator.load(triangle(), Settings::default()).unwrap();
        coordinator.start().unwrap();

        assert!(matches!(
            coordinator.pump(),
            Err(ProtocolError::WorkerTerminated(_))
        ));
        assert_eq!(coordinator.strategy_kind(), StrategyKind::Embedded);

        let events = coordinator.pump().unwrap();
        assert!(matches!(events[0], LayoutEvent::Positions { .. }));
    }

    #[test]
    fn switching_strategy_keeps_the_graph() {
        let mut coordinator = coordinator();
        coordinator.start().unwrap();
        coordinator.pump().unwrap();
        let before = coordinator.snapshot();

        let replacement = EmbeddedStepper::seeded(2);
        coordinator.switch_strategy(Box::new(replacement)).unwrap();
        assert_eq!(coordinator.snapshot(), before);
        assert!(coordinator.is_running());

        let events = coordinator.pump().unwrap();
        assert!(matches!(events[0], LayoutEvent::Positions { .. }));
    }

    #[test]
    fn resize_and_mass_changes_reach_the_strategy() {
        let strategy = RecordingStrategy::default();
        let sent = std::sync::Arc::clone(&strategy.sent);
        let mut coordinator = LayoutCoordinator::new(Box::new(strategy), RecordingSink::default());
        coordinator.load(triangle(), Settings::default()).unwrap();
        coordinator.node_pinned("b").unwrap();
        coordinator.node_resized("b", 15.0).unwrap();
        coordinator.node_mass_changed("b", 4.0).unwrap();

        let sent = sent.lock().unwrap();
        let updates: Vec<_> = sent
            .iter()
            .filter_map(|message| match message {
                HostMessage::UpdateNodeState {
                    is_pinned,
                    radius,
                    mass,
                    ..
                } => Some((*is_pinned, *radius, *mass)),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            vec![
                (true, None, None),
                (true, Some(15.0), None),
                (true, None, Some(4.0)),
            ]
        );

        let b = &coordinator.snapshot().nodes[1];
        assert_eq!((b.radius, b.mass), (Some(15.0), Some(4.0)));
        assert!(matches!(
            coordinator.node_mass_changed("ghost", 1.0),
            Err(LayoutError::Structural(StructuralError::UnknownNode(_)))
        ));
    }
}
