//! Force computation for one simulation step
//!
//! [`compute_forces`] is pure: it reads the graph and the settings and
//! returns one net force per arena slot. Tombstoned and anchored slots hold
//! a zero force.

use std::collections::HashMap;

use glam::DVec3;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::SimGraph;
use crate::settings::Settings;

/// Squared distance below which a pair is considered coincident
pub const DEGENERATE_EPSILON: f64 = 1e-6;

/// Length of the substitute displacement for coincident pairs
pub const DEGENERATE_NUDGE: f64 = 0.1;

/// Scale of the extra push applied to overlapping padded radii
pub const OVERLAP_SCALE: f64 = 1e-4;

/// Extra z scale applied to the gravity force
pub const GRAVITY_Z_SCALE: f64 = 0.5;

/// Net forces indexed by arena slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forces(Vec<DVec3>);

impl Forces {
    fn zeroed(len: usize) -> Self {
        Self(vec![DVec3::ZERO; len])
    }

    /// Force on the node in `index`, zero for unknown slots
    pub fn get(&self, index: NodeIndex) -> DVec3 {
        self.0.get(index.index()).copied().unwrap_or(DVec3::ZERO)
    }

    fn add(&mut self, index: NodeIndex, force: DVec3) {
        self.0[index.index()] += force;
    }

    fn set(&mut self, index: NodeIndex, force: DVec3) {
        self.0[index.index()] = force;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compute the net force on every node for one step
pub fn compute_forces(graph: &SimGraph, settings: &Settings) -> Forces {
    let mut forces = Forces::zeroed(graph.node_bound());
    let indices: Vec<NodeIndex> = graph.node_indices().collect();

    apply_repulsion(graph, &indices, settings, &mut forces);
    apply_constraints(graph, &mut forces);
    apply_gravity(graph, &indices, settings, &mut forces);
    if settings.clustering_enabled {
        apply_clustering(graph, &indices, settings, &mut forces);
    }

    for &index in &indices {
        if graph[index].is_anchored() {
            forces.set(index, DVec3::ZERO);
        } else {
            forces.0[index.index()].z *= settings.z_spread_factor;
        }
    }

    forces
}

/// Repulsion magnitude for a pair at `distance` with combined padded radius `padded`
///
/// Inverse-square falloff, plus an overlap term while the padded radii intersect.
pub fn repulsion_magnitude(distance: f64, padded: f64, repulsion: f64) -> f64 {
    let mut magnitude = repulsion / (distance * distance);
    if padded > distance {
        let overlap = padded - distance;
        magnitude += repulsion * OVERLAP_SCALE * overlap * overlap / distance;
    }
    magnitude
}

fn apply_repulsion(
    graph: &SimGraph,
    indices: &[NodeIndex],
    settings: &Settings,
    forces: &mut Forces,
) {
    if settings.repulsion == 0.0 {
        return;
    }

    for (i, &a) in indices.iter().enumerate() {
        for &b in &indices[i + 1..] {
            let (na, nb) = (&graph[a], &graph[b]);
            let delta = separation(a, b, nb.position - na.position);
            let distance = delta.length();
            let padded = (na.radius + nb.radius) * settings.node_padding;

            let magnitude = repulsion_magnitude(distance, padded, settings.repulsion);
            let force = delta / distance * magnitude;

            forces.add(a, -force);
            forces.add(b, force);
        }
    }
}

fn apply_constraints(graph: &SimGraph, forces: &mut Forces) {
    for edge in graph.edge_references() {
        let (a, b) = (edge.source(), edge.target());
        let (na, nb) = (&graph[a], &graph[b]);
        let constraint = &edge.weight().constraint;

        let delta = separation(a, b, nb.position - na.position);
        let distance = delta.length();
        let target = constraint.target_length(na.radius, nb.radius);

        // Hooke's law: F = k * (x - x0)
        let magnitude = constraint.stiffness() * (distance - target);
        let force = delta / distance * magnitude;

        if !na.is_anchored() {
            forces.add(a, force);
        }
        if !nb.is_anchored() {
            forces.add(b, -force);
        }
    }
}

fn apply_gravity(
    graph: &SimGraph,
    indices: &[NodeIndex],
    settings: &Settings,
    forces: &mut Forces,
) {
    if settings.center_strength <= 0.0 {
        return;
    }

    for &index in indices {
        let node = &graph[index];
        if node.is_anchored() {
            continue;
        }
        let mut force = (settings.center - node.position) * settings.center_strength;
        force.z *= GRAVITY_Z_SCALE;
        forces.add(index, force);
    }
}

fn apply_clustering(
    graph: &SimGraph,
    indices: &[NodeIndex],
    settings: &Settings,
    forces: &mut Forces,
) {
    let mut sums: HashMap<&str, (DVec3, usize)> = HashMap::new();
    for &index in indices {
        let node = &graph[index];
        if let (Some(cluster), false) = (node.cluster_id.as_deref(), node.is_anchored()) {
            let entry = sums.entry(cluster).or_insert((DVec3::ZERO, 0));
            entry.0 += node.position;
            entry.1 += 1;
        }
    }

    for &index in indices {
        let node = &graph[index];
        if node.is_anchored() {
            continue;
        }
        let Some(&(sum, count)) = node.cluster_id.as_deref().and_then(|c| sums.get(c)) else {
            continue;
        };
        let centroid = sum / count as f64;
        forces.add(index, (centroid - node.position) * settings.cluster_strength);
    }
}

/// Displacement from `a` to `b`, replaced by a small arbitrary vector when
/// the two coincide
///
/// The substitute is seeded from the slot pair, so repeated calls with the
/// same input agree.
fn separation(a: NodeIndex, b: NodeIndex, delta: DVec3) -> DVec3 {
    if delta.length_squared() >= DEGENERATE_EPSILON && delta.is_finite() {
        return delta;
    }
    let seed = ((a.index() as u64) << 32) | b.index() as u64;
    let mut rng = StdRng::seed_from_u64(seed);
    random_unit(&mut rng) * DEGENERATE_NUDGE
}

/// Uniformly distributed unit vector
pub(crate) fn random_unit<R: Rng>(rng: &mut R) -> DVec3 {
    loop {
        let v = DVec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, SimEdge, SimNode};

    fn settings_without(repulsion: bool, gravity: bool) -> Settings {
        Settings {
            repulsion: if repulsion { 1000.0 } else { 0.0 },
            center_strength: if gravity { 0.01 } else { 0.0 },
            ..Default::default()
        }
    }

    fn graph_with(nodes: Vec<SimNode>) -> (SimGraph, Vec<NodeIndex>) {
        let mut graph = SimGraph::default();
        let indices = nodes.into_iter().map(|n| graph.add_node(n)).collect();
        (graph, indices)
    }

    #[test]
    fn repulsion_decreases_with_distance() {
        let mut previous = f64::INFINITY;
        for step in 1..200 {
            let distance = 30.0 + step as f64 * 2.5;
            let magnitude = repulsion_magnitude(distance, 20.0, 1000.0);
            assert!(magnitude < previous, "not decreasing at {distance}");
            previous = magnitude;
        }
    }

    #[test]
    fn overlap_adds_corrective_push() {
        let plain = 1000.0 / (10.0 * 10.0);
        assert_eq!(repulsion_magnitude(10.0, 5.0, 1000.0), plain);
        assert!(repulsion_magnitude(10.0, 30.0, 1000.0) > plain);
    }

    #[test]
    fn repulsion_pushes_pair_apart_symmetrically() {
        let (graph, idx) = graph_with(vec![
            SimNode::new("a", 0.0, 0.0, 0.0),
            SimNode::new("b", 10.0, 0.0, 0.0),
        ]);
        let forces = compute_forces(&graph, &settings_without(true, false));

        assert!(forces.get(idx[0]).x < 0.0);
        assert!(forces.get(idx[1]).x > 0.0);
        assert!((forces.get(idx[0]) + forces.get(idx[1])).length() < 1e-12);
    }

    #[test]
    fn coincident_nodes_get_finite_deterministic_push() {
        let (graph, idx) = graph_with(vec![
            SimNode::new("a", 5.0, 5.0, 5.0),
            SimNode::new("b", 5.0, 5.0, 5.0),
        ]);
        let settings = settings_without(true, false);
        let first = compute_forces(&graph, &settings);
        let second = compute_forces(&graph, &settings);

        assert!(first.get(idx[0]).is_finite());
        assert!(first.get(idx[0]).length() > 0.0);
        assert_eq!(first, second);
    }

    #[test]
    fn stretched_spring_pulls_endpoints_together() {
        let (mut graph, idx) = graph_with(vec![
            SimNode::new("a", 0.0, 0.0, 0.0),
            SimNode::new("b", 200.0, 0.0, 0.0),
        ]);
        let constraint = Constraint::Elastic {
            ideal_length: 100.0,
            stiffness: 0.01,
        };
        graph.add_edge(idx[0], idx[1], SimEdge::new("a", "b", constraint));

        let forces = compute_forces(&graph, &settings_without(false, false));
        assert!((forces.get(idx[0]).x - 1.0).abs() < 1e-12);
        assert!((forces.get(idx[1]).x + 1.0).abs() < 1e-12);
    }

    #[test]
    fn anchored_node_net_force_is_discarded() {
        let (mut graph, idx) = graph_with(vec![
            SimNode::new("a", 0.0, 0.0, 0.0).with_fixed(true),
            SimNode::new("b", 10.0, 0.0, 0.0),
        ]);
        graph.add_edge(
            idx[0],
            idx[1],
            SimEdge::new("a", "b", Constraint::elastic(&Settings::default())),
        );

        let forces = compute_forces(&graph, &settings_without(true, true));
        assert_eq!(forces.get(idx[0]), DVec3::ZERO);
        assert!(forces.get(idx[1]).length() > 0.0);
    }

    #[test]
    fn z_forces_are_flattened() {
        let (graph, idx) = graph_with(vec![SimNode::new("a", 0.0, 0.0, 100.0)]);
        let mut settings = settings_without(false, true);
        settings.z_spread_factor = 0.5;

        let force = compute_forces(&graph, &settings).get(idx[0]);
        // gravity -1.0 scaled by 0.5 (gravity) and 0.5 (z spread)
        assert!((force.z + 0.25).abs() < 1e-12);
    }

    #[test]
    fn cluster_members_pull_toward_centroid() {
        let (graph, idx) = graph_with(vec![
            SimNode::new("a", -10.0, 0.0, 0.0).with_cluster("c"),
            SimNode::new("b", 10.0, 0.0, 0.0).with_cluster("c"),
            SimNode::new("loner", 50.0, 0.0, 0.0),
        ]);
        let mut settings = settings_without(false, false);
        settings.clustering_enabled = true;
        settings.cluster_strength = 0.1;

        let forces = compute_forces(&graph, &settings);
        assert!((forces.get(idx[0]).x - 1.0).abs() < 1e-12);
        assert!((forces.get(idx[1]).x + 1.0).abs() < 1e-12);
        assert_eq!(forces.get(idx[2]), DVec3::ZERO);
    }

    #[test]
    fn tombstoned_slots_are_zero() {
        let (mut graph, idx) = graph_with(vec![
            SimNode::new("a", 0.0, 0.0, 0.0),
            SimNode::new("b", 10.0, 0.0, 0.0),
            SimNode::new("c", 20.0, 0.0, 0.0),
        ]);
        graph.remove_node(idx[1]);

        let forces = compute_forces(&graph, &settings_without(true, false));
        assert_eq!(forces.len(), 3);
        assert_eq!(forces.get(idx[1]), DVec3::ZERO);
        assert!(forces.get(idx[2]).x > 0.0);
    }

    #[test]
    fn random_unit_has_unit_length() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!((random_unit(&mut rng).length() - 1.0).abs() < 1e-9);
        }
    }
}
