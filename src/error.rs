//! Error taxonomy for the layout engine
//!
//! Structural errors are recovered in place: the offending mutation is
//! rejected and the simulation keeps running. Protocol errors are the only
//! class surfaced to the host, so it can fall back to the embedded stepper or
//! halt the layout. Numeric instability never becomes an error value; the
//! integrator zeroes the offending node instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A graph mutation that would break a registry invariant
///
/// Serializable so the worker can report rejections back to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "detail",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum StructuralError {
    /// A node with this id is already registered
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// The referenced node does not exist
    #[error("unknown node id: {0}")]
    UnknownNode(String),

    /// An edge whose endpoints are the same node
    #[error("self-edge on node: {0}")]
    SelfEdge(String),

    /// An edge already connects these two nodes
    #[error("duplicate edge: {source_id} - {target_id}")]
    DuplicateEdge { source_id: String, target_id: String },

    /// No edge connects these two nodes
    #[error("unknown edge: {source_id} - {target_id}")]
    UnknownEdge { source_id: String, target_id: String },
}

/// Failures of the host/worker message channel
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message could not be decoded
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The other side reported a message it could not handle
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The worker task ended or its channel closed
    #[error("worker terminated: {0}")]
    WorkerTerminated(String),

    /// The strategy was driven before `init`
    #[error("strategy not initialized")]
    NotInitialized,
}

/// Anything a coordinator call can fail with
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors loading settings or graph documents from disk
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file extension is not a known document format
    #[error("could not determine document format from path: {0}")]
    UnknownExtension(PathBuf),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for structural mutations
pub type StructuralResult<T> = Result<T, StructuralError>;
