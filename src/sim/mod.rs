//! Force-directed simulation core
//!
//! This module holds everything that runs inside one simulation step and
//! nothing that knows about threads or channels:
//!
//! - **Kernel**: per-node net force (repulsion, edge constraints, gravity,
//!   clustering)
//! - **Integrator**: force → velocity → position, returns kinetic energy
//! - **State**: the node/edge registry plus its mutation operations
//! - **Convergence**: decides when stepping may stop
//!
//! # Example
//!
//! ```rust
//! use graphforce::model::{Constraint, SimEdge, SimNode};
//! use graphforce::settings::Settings;
//! use graphforce::sim::SimulationState;
//!
//! let mut state = SimulationState::new(Settings::default());
//! state.add_node(SimNode::new("a", 0.0, 0.0, 0.0)).unwrap();
//! state.add_node(SimNode::new("b", 50.0, 0.0, 0.0)).unwrap();
//! let elastic = Constraint::elastic(state.settings());
//! state.add_edge(SimEdge::new("a", "b", elastic)).unwrap();
//!
//! let energy = state.step();
//! assert!(energy > 0.0);
//! ```
//!
//! Storage is a `petgraph` stable graph: removing a node tombstones its slot,
//! so indices held during a step stay valid.

use petgraph::Undirected;
use petgraph::stable_graph::StableGraph;

use crate::model::{SimEdge, SimNode};

pub mod convergence;
pub mod integrator;
pub mod kernel;
pub mod state;

pub use convergence::{ConvergenceController, Phase};
pub use integrator::integrate;
pub use kernel::{Forces, compute_forces, repulsion_magnitude};
pub use state::SimulationState;

/// Node/edge arena shared by the kernel, integrator and state
pub type SimGraph = StableGraph<SimNode, SimEdge, Undirected>;
