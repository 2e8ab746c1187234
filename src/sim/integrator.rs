//! Velocity/position integration

use glam::DVec3;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::NodeIndexable;
use tracing::{debug, warn};

use super::{Forces, SimGraph};
use crate::settings::Settings;

/// Apply `forces` to every free node and return the step's total kinetic energy
///
/// `velocity = (velocity + force / mass) * damping`, clamped to `max_speed`,
/// then `position += velocity`. Non-finite velocities are zeroed; a
/// non-finite position resets the node to the origin at rest.
pub fn integrate(graph: &mut SimGraph, forces: &Forces, settings: &Settings) -> f64 {
    let mut energy = 0.0;

    for slot in 0..graph.node_bound() {
        let index = NodeIndex::new(slot);
        let Some(node) = graph.node_weight_mut(index) else {
            continue;
        };
        if node.is_anchored() {
            node.velocity = DVec3::ZERO;
            continue;
        }

        let acceleration = forces.get(index) / node.mass;
        let mut velocity = (node.velocity + acceleration) * settings.damping;

        if !velocity.is_finite() {
            debug!(node = %node.id, "non-finite velocity, zeroing");
            velocity = DVec3::ZERO;
        }

        let speed = velocity.length();
        if speed > settings.max_speed {
            velocity *= settings.max_speed / speed;
        }

        let position = node.position + velocity;
        if position.is_finite() {
            node.position = position;
            node.velocity = velocity;
        } else {
            warn!(node = %node.id, "non-finite position, resetting to origin");
            node.position = DVec3::ZERO;
            node.velocity = DVec3::ZERO;
        }

        energy += node.kinetic_energy();
    }

    energy
}
