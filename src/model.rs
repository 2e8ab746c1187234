//! Simulation data model
//!
//! [`SimNode`] and [`SimEdge`] are the engine's internal records. The
//! `*Snapshot` types are what the host hands over (and what crosses the
//! worker channel); they use camelCase field names and optional parameters
//! that resolve against [`Settings`] when converted.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Smallest mass a node may have
pub const MIN_MASS: f64 = 1e-3;

/// A point mass in the simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub id: String,
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    /// Used for repulsion padding and weld distances
    pub radius: f64,
    /// Transient anchor (e.g. while dragged)
    pub is_fixed: bool,
    /// Persistent user anchor
    pub is_pinned: bool,
    pub cluster_id: Option<String>,
}

impl SimNode {
    /// Create a free node at the given position with unit mass and no radius
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.into(),
            position: DVec3::new(x, y, z),
            velocity: DVec3::ZERO,
            mass: 1.0,
            radius: 0.0,
            is_fixed: false,
            is_pinned: false,
            cluster_id: None,
        }
    }

    /// Set the mass (clamped to [`MIN_MASS`])
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = clamp_mass(mass);
        self
    }

    /// Set the radius (negative values become zero)
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = clamp_radius(radius);
        self
    }

    /// Mark the node fixed
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.is_fixed = fixed;
        if fixed {
            self.velocity = DVec3::ZERO;
        }
        self
    }

    /// Tag the node with a cluster
    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    /// True when forces must not move this node
    #[inline]
    pub fn is_anchored(&self) -> bool {
        self.is_fixed || self.is_pinned
    }

    /// Kinetic energy of this node
    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.length_squared()
    }
}

pub(crate) fn clamp_mass(mass: f64) -> f64 {
    if mass.is_finite() { mass.max(MIN_MASS) } else { 1.0 }
}

pub(crate) fn clamp_radius(radius: f64) -> f64 {
    if radius.is_finite() { radius.max(0.0) } else { 0.0 }
}

/// Spring behavior of an edge, with fully resolved parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Soft Hooke's-law spring
    Elastic { ideal_length: f64, stiffness: f64 },
    /// Stiff spring toward an explicit distance
    Rigid { distance: f64, stiffness: f64 },
    /// Very stiff spring; `None` keeps the endpoints flush against each other's radii
    Weld { distance: Option<f64>, stiffness: f64 },
}

impl Constraint {
    /// Elastic constraint with the settings' defaults
    pub fn elastic(settings: &Settings) -> Self {
        Self::Elastic {
            ideal_length: settings.elastic.length,
            stiffness: settings.elastic.stiffness,
        }
    }

    /// Rigid constraint with the settings' defaults
    pub fn rigid(settings: &Settings) -> Self {
        Self::Rigid {
            distance: settings.rigid.length,
            stiffness: settings.rigid.stiffness,
        }
    }

    /// Weld constraint with the settings' defaults
    pub fn weld(settings: &Settings) -> Self {
        Self::Weld {
            distance: None,
            stiffness: settings.weld.stiffness,
        }
    }

    /// Which kind of constraint this is
    pub fn kind(&self) -> ConstraintType {
        match self {
            Constraint::Elastic { .. } => ConstraintType::Elastic,
            Constraint::Rigid { .. } => ConstraintType::Rigid,
            Constraint::Weld { .. } => ConstraintType::Weld,
        }
    }

    /// Spring constant
    pub fn stiffness(&self) -> f64 {
        match *self {
            Constraint::Elastic { stiffness, .. }
            | Constraint::Rigid { stiffness, .. }
            | Constraint::Weld { stiffness, .. } => stiffness,
        }
    }

    /// Distance the constraint pulls its endpoints toward
    pub fn target_length(&self, source_radius: f64, target_radius: f64) -> f64 {
        match *self {
            Constraint::Elastic { ideal_length, .. } => ideal_length,
            Constraint::Rigid { distance, .. } => distance,
            Constraint::Weld { distance, .. } => distance.unwrap_or(source_radius + target_radius),
        }
    }

    /// Resolve wire parameters against the settings' per-type defaults
    pub fn from_params(
        kind: ConstraintType,
        params: Option<&ConstraintParams>,
        settings: &Settings,
    ) -> Self {
        let params = params.copied().unwrap_or_default();
        match kind {
            ConstraintType::Elastic => Self::Elastic {
                ideal_length: params
                    .ideal_length
                    .or(params.distance)
                    .unwrap_or(settings.elastic.length),
                stiffness: params.stiffness.unwrap_or(settings.elastic.stiffness),
            },
            ConstraintType::Rigid => Self::Rigid {
                distance: params
                    .distance
                    .or(params.ideal_length)
                    .unwrap_or(settings.rigid.length),
                stiffness: params.stiffness.unwrap_or(settings.rigid.stiffness),
            },
            ConstraintType::Weld => Self::Weld {
                distance: params.distance,
                stiffness: params.stiffness.unwrap_or(settings.weld.stiffness),
            },
        }
    }

    /// Wire parameters carrying every resolved value
    pub fn to_params(&self) -> ConstraintParams {
        match *self {
            Constraint::Elastic {
                ideal_length,
                stiffness,
            } => ConstraintParams {
                ideal_length: Some(ideal_length),
                distance: None,
                stiffness: Some(stiffness),
            },
            Constraint::Rigid {
                distance,
                stiffness,
            } => ConstraintParams {
                ideal_length: None,
                distance: Some(distance),
                stiffness: Some(stiffness),
            },
            Constraint::Weld {
                distance,
                stiffness,
            } => ConstraintParams {
                ideal_length: None,
                distance,
                stiffness: Some(stiffness),
            },
        }
    }
}

/// Constraint kind tag as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    #[default]
    Elastic,
    Rigid,
    Weld,
}

/// Untyped constraint parameters as sent by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stiffness: Option<f64>,
}

/// An edge between two registered nodes
#[derive(Debug, Clone, PartialEq)]
pub struct SimEdge {
    pub source_id: String,
    pub target_id: String,
    pub constraint: Constraint,
}

impl SimEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        constraint: Constraint,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            constraint,
        }
    }

    /// True when this edge joins `a` and `b` in either orientation
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source_id == a && self.target_id == b)
            || (self.source_id == b && self.target_id == a)
    }
}

/// Node as handed over by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl NodeSnapshot {
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z,
            mass: None,
            radius: None,
            is_fixed: false,
            is_pinned: false,
            cluster_id: None,
        }
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    /// Build the simulation record (velocity starts at rest)
    pub fn to_sim_node(&self) -> SimNode {
        let mut node = SimNode::new(self.id.clone(), self.x, self.y, self.z)
            .with_mass(self.mass.unwrap_or(1.0))
            .with_radius(self.radius.unwrap_or(0.0))
            .with_fixed(self.is_fixed);
        node.is_pinned = self.is_pinned;
        node.cluster_id = self.cluster_id.clone();
        node
    }

    /// Capture a simulation record
    pub fn from_sim_node(node: &SimNode) -> Self {
        Self {
            id: node.id.clone(),
            x: node.position.x,
            y: node.position.y,
            z: node.position.z,
            mass: Some(node.mass),
            radius: Some(node.radius),
            is_fixed: node.is_fixed,
            is_pinned: node.is_pinned,
            cluster_id: node.cluster_id.clone(),
        }
    }
}

/// Edge as handed over by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSnapshot {
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub constraint_type: ConstraintType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_params: Option<ConstraintParams>,
}

impl EdgeSnapshot {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        constraint_type: ConstraintType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            constraint_type,
            constraint_params: None,
        }
    }

    pub fn with_params(mut self, params: ConstraintParams) -> Self {
        self.constraint_params = Some(params);
        self
    }

    /// Resolve into a simulation edge using the settings' defaults
    pub fn to_sim_edge(&self, settings: &Settings) -> SimEdge {
        SimEdge::new(
            self.source_id.clone(),
            self.target_id.clone(),
            Constraint::from_params(
                self.constraint_type,
                self.constraint_params.as_ref(),
                settings,
            ),
        )
    }

    pub fn from_sim_edge(edge: &SimEdge) -> Self {
        Self {
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            constraint_type: edge.constraint.kind(),
            constraint_params: Some(edge.constraint.to_params()),
        }
    }
}

/// Full node and edge state, used for `init` and for strategy migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub edges: Vec<EdgeSnapshot>,
}

/// One node's position in a per-step update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl NodePosition {
    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}
