//! graphforce - force-directed 3D graph layout
//!
//! Nodes repel each other, edges pull their endpoints toward a target length,
//! and a weak gravity keeps the graph centred. The simulation stops by itself
//! once the layout settles and resumes on any structural change or kick.
//!
//! The same simulation can run inline with the host's frame loop
//! ([`strategy::EmbeddedStepper`]) or on a background tokio task
//! ([`strategy::OffloadedStepper`]); [`coordinator::LayoutCoordinator`]
//! drives either one from host graph events.

pub mod coordinator;
pub mod document;
pub mod error;
pub mod model;
pub mod settings;
pub mod sim;
pub mod strategy;
